//! Streaming multipart upload.
//!
//! The file part is forwarded chunk by chunk to a blocking task that writes
//! it through the upload store, so the size limit is enforced while the body
//! is still arriving.

use std::io::{self, Read};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::Json;
use log::{debug, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use mdbconv::{ConvertError, JobSnapshot, JobState, ValidationError};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Multipart part carrying the database.
const FILE_FIELD: &str = "file";

/// Chunks buffered between the request body and the writer.
const CHUNK_BUFFER: usize = 16;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub job_id: String,
    pub filename: String,
    pub size: u64,
    pub state: JobState,
}

impl From<JobSnapshot> for UploadResponse {
    fn from(snapshot: JobSnapshot) -> Self {
        Self {
            job_id: snapshot.job_id,
            filename: snapshot.filename,
            size: snapshot.source_size,
            state: snapshot.state,
        }
    }
}

/// `POST /upload`
pub async fn upload_database(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some(FILE_FIELD) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }
        let snapshot = store_field(&state, field).await?;
        return Ok(Json(snapshot.into()));
    }

    Err(ConvertError::Validation(ValidationError::MissingFilename).into())
}

async fn store_field(state: &AppState, mut field: Field<'_>) -> ApiResult<JobSnapshot> {
    let filename = field.file_name().unwrap_or_default().to_string();
    let (sender, receiver) = mpsc::channel(CHUNK_BUFFER);

    let orchestrator = Arc::clone(&state.orchestrator);
    let registering = tokio::task::spawn_blocking(move || {
        orchestrator.register_upload(&filename, ChannelReader::new(receiver))
    });

    let mut client_error = None;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => Ok(chunk),
            Ok(None) => break,
            Err(e) => {
                let message = e.body_text();
                client_error = Some(message.clone());
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, message))
            }
        };
        let failed = chunk.is_err();
        // The writer hangs up early when it rejects the upload.
        if sender.send(chunk).await.is_err() || failed {
            break;
        }
    }
    drop(sender);

    match registering.await? {
        Ok(snapshot) => Ok(snapshot),
        Err(e) => match client_error {
            Some(message) if !matches!(e, ConvertError::Validation(_)) => {
                warn!("Upload aborted by client: {}", message);
                Err(ApiError::BadRequest(format!("Upload interrupted: {}", message)))
            }
            _ => Err(e.into()),
        },
    }
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Invalid multipart body: {}", err.body_text()))
}

/// Blocking `Read` over chunks sent from the request task.
struct ChannelReader {
    receiver: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
}

impl ChannelReader {
    fn new(receiver: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            receiver,
            current: Bytes::new(),
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.receiver.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len());
        let chunk = self.current.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_reader_concatenates_chunks() {
        let (sender, receiver) = mpsc::channel(4);
        sender.try_send(Ok(Bytes::from_static(b"Standard "))).unwrap();
        sender.try_send(Ok(Bytes::from_static(b"Jet DB"))).unwrap();
        drop(sender);

        let mut content = String::new();
        ChannelReader::new(receiver)
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "Standard Jet DB");
    }

    #[test]
    fn test_channel_reader_surfaces_stream_error() {
        let (sender, receiver) = mpsc::channel(4);
        sender.try_send(Ok(Bytes::from_static(b"abc"))).unwrap();
        sender
            .try_send(Err(io::Error::new(io::ErrorKind::UnexpectedEof, "reset")))
            .unwrap();

        let mut content = Vec::new();
        let err = ChannelReader::new(receiver)
            .read_to_end(&mut content)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(content, b"abc");
    }
}
