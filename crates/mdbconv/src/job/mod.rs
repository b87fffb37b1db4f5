pub mod model;
pub mod registry;

pub use model::{
    ConversionRequest, Job, JobError, JobSnapshot, JobState, JobSummary, OutputFile, Progress,
    Selection,
};
pub use registry::{JobCell, JobRegistry};
