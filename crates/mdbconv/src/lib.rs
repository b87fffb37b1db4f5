pub mod broadcast;
pub mod config;
pub mod error;
pub mod export;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod reader;
pub mod sanitize;
pub mod storage;
pub mod sweeper;
pub mod worker;

pub use broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_dotenv, Settings};
pub use error::{
    AdapterError, ConvertError, EncodeError, ErrorKind, Result, StorageError, ValidationError,
};
pub use export::{EncoderRegistry, ExportFormat, TableEncoder};
pub use job::{ConversionRequest, JobSnapshot, JobState, JobSummary};
pub use orchestrator::{FileDownload, Orchestrator, OrchestratorStats};
pub use pipeline::{BroadcastProgress, NoopProgress, ProgressReporter};
pub use reader::{
    CellValue, Column, MdbToolsReader, MemoryReader, ReaderDiagnostics, TableDescriptor,
    TableReader, ToolStatus,
};
pub use sweeper::{CleanupSweeper, SweepReport};
