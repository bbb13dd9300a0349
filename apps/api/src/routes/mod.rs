pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::events::handlers as events;
use crate::jobs::handlers as jobs;
use crate::state::AppState;

/// Uploads larger than this are rejected before reaching the handler.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Event stream
        .route("/api/v1/events", get(events::handle_subscribe))
        .route("/api/v1/events/cache", get(events::handle_cache_snapshot))
        // Resume API
        .route(
            "/api/v1/resumes",
            post(jobs::handle_submit)
                .get(jobs::handle_list)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/api/v1/resumes/:id",
            get(jobs::handle_get).delete(jobs::handle_delete),
        )
        .route("/api/v1/resumes/:id/file", get(jobs::handle_get_file))
        .route("/api/v1/resumes/:id/url", get(jobs::handle_presigned_url))
        .with_state(state)
}
