pub mod pool;

pub use pool::{JobHandler, WorkerPool};
