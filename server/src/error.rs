//! Mapping of library errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde::Serialize;

use mdbconv::{ConvertError, ErrorKind};

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Convert(ConvertError),
    /// Malformed request that never reached the orchestrator.
    BadRequest(String),
    /// Server-side fault outside the orchestrator (task join, I/O).
    Internal(String),
}

impl From<ConvertError> for ApiError {
    fn from(err: ConvertError) -> Self {
        ApiError::Convert(err)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {}", err))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Convert(err) => status_for(err),
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            ApiError::Convert(err) => ErrorBody {
                error: err.kind().to_string(),
                message: err.public_message(),
            },
            ApiError::BadRequest(message) => ErrorBody {
                error: ErrorKind::Validation.to_string(),
                message: message.clone(),
            },
            ApiError::Internal(_) => ErrorBody {
                error: ErrorKind::System.to_string(),
                message: "Internal server error".to_string(),
            },
        }
    }
}

fn status_for(err: &ConvertError) -> StatusCode {
    match err.kind() {
        ErrorKind::Validation => match err {
            ConvertError::Validation(v) if v.is_too_large() => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        },
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidState
        | ErrorKind::NotReady
        | ErrorKind::Cancelled
        | ErrorKind::Timeout
        | ErrorKind::Expired => StatusCode::CONFLICT,
        ErrorKind::Adapter => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Encoder | ErrorKind::System => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            match &self {
                ApiError::Convert(err) => error!("Request failed: {:?}", err),
                ApiError::Internal(message) => error!("Request failed: {}", message),
                ApiError::BadRequest(_) => {}
            }
        }
        (status, Json(self.body())).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
