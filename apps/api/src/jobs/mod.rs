// Job lifecycle: records, persistence, submission handling and HTTP handlers.

pub mod coordinator;
pub mod handlers;
pub mod models;
pub mod pg_store;
pub mod store;

pub use coordinator::{JobCoordinator, SubmitStatus, Upload};
pub use models::JobRecord;
