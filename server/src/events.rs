//! Server-sent event stream of job progress.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{future, Stream, StreamExt};
use log::warn;
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use mdbconv::JobProgressEvent;

use crate::state::AppState;

/// SSE event name for progress updates.
pub const JOB_PROGRESS: &str = "job-progress";

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Only forward events of this job.
    pub job: Option<String>,
}

/// `GET /events`
///
/// Streams every progress event published after the client connected. The
/// stream ends when the server shuts down.
pub async fn job_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.broadcaster.subscribe();
    let shutdown = state.shutdown.clone().cancelled_owned();

    let stream = BroadcastStream::new(receiver)
        .filter_map(move |item| future::ready(to_sse(item, query.job.as_deref())))
        .map(Ok::<Event, Infallible>)
        .take_until(shutdown);

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(
    item: Result<JobProgressEvent, BroadcastStreamRecvError>,
    job_filter: Option<&str>,
) -> Option<Event> {
    let event = match item {
        Ok(event) => event,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!("Event stream subscriber lagged, skipped {} events", skipped);
            return None;
        }
    };

    if job_filter.is_some_and(|job| job != event.job_id) {
        return None;
    }

    match Event::default().event(JOB_PROGRESS).json_data(&event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            warn!("Failed to serialize progress event: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mdbconv::job::Progress;
    use mdbconv::{JobPhase, JobState};

    fn event(job_id: &str) -> JobProgressEvent {
        JobProgressEvent {
            job_id: job_id.to_string(),
            filename: "shop.mdb".to_string(),
            state: JobState::Converting,
            phase: JobPhase::Exporting,
            message: "Exporting Customers".to_string(),
            progress: Progress::default(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_filter_by_job() {
        assert!(to_sse(Ok(event("a")), Some("a")).is_some());
        assert!(to_sse(Ok(event("b")), Some("a")).is_none());
        assert!(to_sse(Ok(event("b")), None).is_some());
    }

    #[test]
    fn test_lag_is_skipped() {
        assert!(to_sse(Err(BroadcastStreamRecvError::Lagged(3)), None).is_none());
    }
}
