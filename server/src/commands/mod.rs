//! HTTP handlers for the conversion service.
//!
//! Handlers are organized by concern:
//! - `upload`: streaming database upload
//! - `jobs`: table discovery, conversion, status, download, cancel, delete
//! - `health`: liveness, queue figures and reader diagnostics

pub mod health;
pub mod jobs;
pub mod upload;

pub use health::*;
pub use jobs::*;
pub use upload::*;
