use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use mdbconv::{OrchestratorStats, ReaderDiagnostics};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub jobs: OrchestratorStats,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        jobs: state.orchestrator.stats(),
    })
}

/// `GET /diagnostics/reader`: whether the table reader's tools are installed.
pub async fn reader_diagnostics(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ReaderDiagnostics>> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let report = tokio::task::spawn_blocking(move || orchestrator.diagnostics()).await?;
    Ok(Json(report))
}
