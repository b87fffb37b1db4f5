use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::job::JobSnapshot;

/// Receives a snapshot after every observable job change.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, snapshot: &JobSnapshot);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _snapshot: &JobSnapshot) {}
}

/// Bridges job snapshots to the broadcast channel.
#[derive(Clone)]
pub struct BroadcastProgress {
    broadcaster: JobProgressBroadcaster,
}

impl BroadcastProgress {
    pub fn new(broadcaster: JobProgressBroadcaster) -> Self {
        Self { broadcaster }
    }

    pub fn broadcaster(&self) -> &JobProgressBroadcaster {
        &self.broadcaster
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, snapshot: &JobSnapshot) {
        self.broadcaster
            .send(JobProgressEvent::from_snapshot(snapshot));
    }
}
