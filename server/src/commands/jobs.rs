//! Job routes: discovery, conversion, status, download and housekeeping.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use mdbconv::{
    ConversionRequest, ConvertError, ExportFormat, FileDownload, JobSnapshot, JobSummary,
    TableDescriptor, ValidationError,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablesResponse {
    pub job_id: String,
    pub table_count: usize,
    pub tables: Vec<TableDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    /// Export format to pick when a table was written in several.
    pub format: Option<String>,
}

/// `GET /tables/{jobId}`
pub async fn list_tables(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<TablesResponse>> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let id = job_id.clone();
    let tables = tokio::task::spawn_blocking(move || orchestrator.list_tables(&id)).await??;

    Ok(Json(TablesResponse {
        job_id,
        table_count: tables.len(),
        tables,
    }))
}

/// `POST /convert/{jobId}`
pub async fn start_conversion(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    request: Result<Json<ConversionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobSnapshot>)> {
    let Json(request) = request.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let snapshot = state.orchestrator.start_conversion(&job_id, &request)?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// `GET /status/{jobId}`
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.orchestrator.status(&job_id)?))
}

/// `GET /download/{jobId}`: streams the finished archive.
pub async fn download_archive(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let download = state.orchestrator.archive(&job_id)?;
    stream_file(&job_id, download).await
}

/// `GET /download/{jobId}/{table}?format=`: streams one exported file.
pub async fn download_table(
    State(state): State<Arc<AppState>>,
    Path((job_id, table)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let format = match query.format.as_deref() {
        None => None,
        Some(name) => Some(ExportFormat::parse(name).ok_or_else(|| {
            ConvertError::Validation(ValidationError::UnsupportedFormat(name.to_string()))
        })?),
    };

    let download = state.orchestrator.table_output(&job_id, &table, format)?;
    stream_file(&job_id, download).await
}

async fn stream_file(job_id: &str, download: FileDownload) -> ApiResult<Response> {
    let file = tokio::fs::File::open(&download.path)
        .await
        .map_err(|e| open_error(job_id, e))?;

    let content_type = HeaderValue::from_str(&download.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&content_disposition(&download.file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, HeaderValue::from(download.size)),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// The sweeper may remove a file between lookup and open.
fn open_error(job_id: &str, err: io::Error) -> ApiError {
    match err.kind() {
        io::ErrorKind::NotFound => {
            ConvertError::NotFound(format!("output of job {}", job_id)).into()
        }
        _ => ApiError::Internal(format!("cannot open output of job {}: {}", job_id, err)),
    }
}

/// `POST /cancel/{jobId}`
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<(StatusCode, Json<JobSnapshot>)> {
    let snapshot = state.orchestrator.cancel(&job_id)?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// `DELETE /jobs/{jobId}`
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::task::spawn_blocking(move || orchestrator.delete(&job_id)).await??;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /jobs?limit=`
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> Json<Vec<JobSummary>> {
    Json(state.orchestrator.list_jobs(query.limit))
}

/// `attachment` header value with an ASCII fallback name and the exact name
/// percent-encoded as UTF-8.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut encoded = String::with_capacity(file_name.len());
    for byte in file_name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}
