use std::sync::Arc;

use crate::config::Config;
use crate::events::EventHub;
use crate::jobs::JobCoordinator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// The one event hub; every producer and the SSE endpoint share it.
    pub hub: Arc<EventHub>,
    pub jobs: JobCoordinator,
    pub config: Config,
}
