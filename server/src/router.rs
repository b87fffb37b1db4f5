//! HTTP router construction.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{commands, events};

/// Multipart framing allowance on top of the configured upload size.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state
        .orchestrator
        .settings()
        .max_upload_size
        .saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(commands::health))
        .route("/diagnostics/reader", get(commands::reader_diagnostics))
        .route(
            "/upload",
            post(commands::upload_database).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/tables/{job_id}", get(commands::list_tables))
        .route("/convert/{job_id}", post(commands::start_conversion))
        .route("/status/{job_id}", get(commands::job_status))
        .route("/download/{job_id}", get(commands::download_archive))
        .route("/download/{job_id}/{table}", get(commands::download_table))
        .route("/cancel/{job_id}", post(commands::cancel_job))
        .route("/jobs", get(commands::list_jobs))
        .route("/jobs/{job_id}", delete(commands::delete_job))
        .route("/events", get(events::job_events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
