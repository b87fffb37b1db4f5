//! Broadcasting of job progress for real-time event streaming.
//!
//! Used by the HTTP server's event stream and by any other integration.

pub mod job_progress;

pub use job_progress::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
