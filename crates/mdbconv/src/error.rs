use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::export::ExportFormat;
use crate::job::JobState;
use crate::sanitize::redact_path;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} is {state}; cannot {operation}")]
    InvalidState {
        job_id: String,
        state: JobState,
        operation: &'static str,
    },

    #[error("Job {job_id} is not ready for download (state: {state})")]
    NotReady { job_id: String, state: JobState },

    #[error("Table discovery failed: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Failed to read table '{table}': {source}")]
    TableRead {
        table: String,
        #[source]
        source: AdapterError,
    },

    #[error("Failed to export table '{table}' as {format}: {source}")]
    Encoder {
        table: String,
        format: ExportFormat,
        #[source]
        source: EncodeError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Conversion cancelled")]
    Cancelled,

    #[error("Conversion exceeded the time limit of {minutes} minutes")]
    Timeout { minutes: u64 },

    #[error("Job expired before conversion was started")]
    Expired,

    #[error("Internal error: {0}")]
    System(String),
}

impl ConvertError {
    /// Classifies the error for clients and for the failure record on a job.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::Validation(_) => ErrorKind::Validation,
            ConvertError::NotFound(_) => ErrorKind::NotFound,
            ConvertError::InvalidState { .. } => ErrorKind::InvalidState,
            ConvertError::NotReady { .. } => ErrorKind::NotReady,
            ConvertError::Adapter(e) | ConvertError::TableRead { source: e, .. } => {
                if e.is_system_fault() {
                    ErrorKind::System
                } else {
                    ErrorKind::Adapter
                }
            }
            ConvertError::Encoder { .. } => ErrorKind::Encoder,
            ConvertError::Storage(_) | ConvertError::System(_) => ErrorKind::System,
            ConvertError::Cancelled => ErrorKind::Cancelled,
            ConvertError::Timeout { .. } => ErrorKind::Timeout,
            ConvertError::Expired => ErrorKind::Expired,
        }
    }

    /// Message safe to show to a client. System faults never leak detail.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::System => "Internal error during conversion".to_string(),
            _ => self.to_string(),
        }
    }

    /// Table the error is attributed to, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            ConvertError::TableRead { table, .. } | ConvertError::Encoder { table, .. } => {
                Some(table)
            }
            _ => None,
        }
    }

    pub fn format(&self) -> Option<ExportFormat> {
        match self {
            ConvertError::Encoder { format, .. } => Some(*format),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    NotReady,
    Adapter,
    Encoder,
    Cancelled,
    Timeout,
    Expired,
    System,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::Adapter => "adapter",
            ErrorKind::Encoder => "encoder",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Expired => "expired",
            ErrorKind::System => "system",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No filename provided")]
    MissingFilename,

    #[error("File type '{extension}' not allowed. Allowed types: {}", allowed.join(", "))]
    UnsupportedExtension {
        extension: String,
        allowed: Vec<String>,
    },

    #[error("File too large. Maximum size: {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("No tables selected")]
    NoTablesSelected,

    #[error("No output formats selected")]
    NoFormatsSelected,

    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    #[error("Unsupported export format '{0}'")]
    UnsupportedFormat(String),
}

impl ValidationError {
    pub fn is_too_large(&self) -> bool {
        matches!(self, ValidationError::TooLarge { .. })
    }
}

/// Failures of the table reader. Distinct from plain I/O so that a corrupt
/// upload can be told apart from a broken installation.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Database file not found: {}", redact_path(.0))]
    FileNotFound(PathBuf),

    #[error("Cannot open database '{}': {message}", redact_path(.path))]
    Unreadable { path: PathBuf, message: String },

    #[error("Table reader tool '{tool}' is unavailable: {source}")]
    DriverUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Database contains no user tables")]
    NoTables,

    #[error("Database contains {count} tables, more than the limit of {limit}")]
    TooManyTables { count: usize, limit: usize },

    #[error("Failed to read rows from table '{table}': {message}")]
    RowRead { table: String, message: String },
}

impl AdapterError {
    /// True when the fault lies with the host rather than the uploaded file.
    pub fn is_system_fault(&self) -> bool {
        matches!(self, AdapterError::DriverUnavailable { .. })
    }
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Spreadsheet encoding failed: {0}")]
    Spreadsheet(String),

    #[error("PDF encoding failed: {0}")]
    Pdf(String),

    #[error(transparent)]
    Rows(#[from] AdapterError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build archive '{path}': {message}")]
    Archive { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, ConvertError>;
