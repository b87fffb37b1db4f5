pub mod progress;
pub mod runner;

pub use progress::{BroadcastProgress, NoopProgress, ProgressReporter};
pub use runner::ConversionRunner;
