//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{JobError, JobSnapshot, JobState, Progress};

/// Phase of job processing. Finer grained than [`JobState`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Uploaded,
    TablesListed,
    /// Accepted for conversion, waiting for a free worker.
    Queued,
    /// Held by a worker.
    Exporting,
    Packaging,
    Completed,
    Failed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Uploaded => write!(f, "Uploaded"),
            JobPhase::TablesListed => write!(f, "Tables listed"),
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Exporting => write!(f, "Exporting"),
            JobPhase::Packaging => write!(f, "Packaging"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    /// Original filename of the uploaded database.
    pub filename: String,
    pub state: JobState,
    pub phase: JobPhase,
    /// Human-readable message describing current activity.
    pub message: String,
    pub progress: Progress,
    /// Failure record (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    pub fn from_snapshot(snapshot: &JobSnapshot) -> Self {
        Self {
            job_id: snapshot.job_id.clone(),
            filename: snapshot.filename.clone(),
            state: snapshot.state,
            phase: snapshot.phase.clone(),
            message: snapshot.message.clone(),
            progress: snapshot.progress.clone(),
            error: snapshot.error.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_final(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Broadcasts job progress events for streaming. Sending with no
/// subscribers is fine.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
