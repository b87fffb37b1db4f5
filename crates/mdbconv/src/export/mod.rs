pub mod archive;
pub mod csv;
pub mod diagram;
pub mod json;
pub mod pdf;
pub mod xlsx;

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EncodeError;
use crate::reader::{RowStream, TableDescriptor};

/// Output formats, declared in the order a table's files are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Xlsx,
    Json,
    Pdf,
    Diagram,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 5] = [
        ExportFormat::Csv,
        ExportFormat::Xlsx,
        ExportFormat::Json,
        ExportFormat::Pdf,
        ExportFormat::Diagram,
    ];

    /// Parses a client-supplied format name. Accepts a few common aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "xlsx" | "excel" => Some(ExportFormat::Xlsx),
            "json" => Some(ExportFormat::Json),
            "pdf" => Some(ExportFormat::Pdf),
            "diagram" | "mermaid" | "schema" | "mmd" => Some(ExportFormat::Diagram),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Json => "json",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Diagram => "mmd",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Json => "json",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Diagram => "diagram",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes one table to one file.
pub trait TableEncoder: Send + Sync {
    fn format(&self) -> ExportFormat;

    /// Reads `rows` and writes `output`. Returns the bytes written.
    fn encode(
        &self,
        table: &TableDescriptor,
        rows: RowStream,
        output: &Path,
    ) -> Result<u64, EncodeError>;
}

pub struct EncoderRegistry {
    encoders: Vec<Box<dyn TableEncoder>>,
}

impl EncoderRegistry {
    /// Registry with an encoder for every format.
    pub fn new() -> Self {
        Self::with_encoders(vec![
            Box::new(csv::CsvEncoder::default()),
            Box::new(xlsx::XlsxEncoder::new()),
            Box::new(json::JsonEncoder::new()),
            Box::new(pdf::PdfEncoder::new()),
            Box::new(diagram::DiagramEncoder::new()),
        ])
    }

    /// Later entries replace earlier ones for the same format.
    pub fn with_encoders(encoders: Vec<Box<dyn TableEncoder>>) -> Self {
        let mut registry = Self { encoders: Vec::new() };
        for encoder in encoders {
            registry.register(encoder);
        }
        registry
    }

    pub fn register(&mut self, encoder: Box<dyn TableEncoder>) {
        self.encoders.retain(|e| e.format() != encoder.format());
        self.encoders.push(encoder);
    }

    pub fn get(&self, format: ExportFormat) -> Option<&dyn TableEncoder> {
        self.encoders
            .iter()
            .find(|e| e.format() == format)
            .map(|e| e.as_ref())
    }

    pub fn supports(&self, format: ExportFormat) -> bool {
        self.get(format).is_some()
    }

    pub fn formats(&self) -> Vec<ExportFormat> {
        let mut formats: Vec<_> = self.encoders.iter().map(|e| e.format()).collect();
        formats.sort();
        formats
    }
}

impl Default for EncoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn create_output(path: &Path) -> Result<BufWriter<File>, EncodeError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| EncodeError::Io {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> EncodeError + '_ {
    move |source| EncodeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub(crate) fn written_size(path: &Path) -> Result<u64, EncodeError> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(io_error(path))
}
