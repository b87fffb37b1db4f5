//! Shared state handed to every handler.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use mdbconv::{JobProgressBroadcaster, Orchestrator};

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Source of the `/events` stream.
    pub broadcaster: JobProgressBroadcaster,
    /// Cancelled on shutdown so open event streams end.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, broadcaster: JobProgressBroadcaster) -> Self {
        Self {
            orchestrator,
            broadcaster,
            shutdown: CancellationToken::new(),
        }
    }
}
