//! Shared test utilities for mdbconv integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated orchestrator instances over temp directories
//! - `FakeReader`, a scriptable table reader, and a builder for its tables

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
