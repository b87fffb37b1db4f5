//! The job record and its state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broadcast::JobPhase;
use crate::error::{ConvertError, ErrorKind, ValidationError};
use crate::export::ExportFormat;
use crate::reader::TableDescriptor;

/// Lifecycle state. Only ever moves forward; `Failed` is reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Uploaded,
    TablesListed,
    Converting,
    Packaging,
    Done,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Uploaded,
        JobState::TablesListed,
        JobState::Converting,
        JobState::Packaging,
        JobState::Done,
        JobState::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// A worker owns the job; its files must not be touched.
    pub fn is_busy(self) -> bool {
        matches!(self, JobState::Converting | JobState::Packaging)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Uploaded, TablesListed)
                | (TablesListed, Converting)
                | (Converting, Packaging)
                | (Packaging, Done)
                | (Uploaded | TablesListed | Converting | Packaging, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Uploaded => "UPLOADED",
            JobState::TablesListed => "TABLES_LISTED",
            JobState::Converting => "CONVERTING",
            JobState::Packaging => "PACKAGING",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure record stored on a job. Written at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ExportFormat>,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            table: None,
            format: None,
        }
    }

    /// Client-safe record of `error`; system faults lose their detail here.
    pub fn from_error(error: &ConvertError) -> Self {
        Self {
            kind: error.kind(),
            message: error.public_message(),
            table: error.table().map(str::to_string),
            format: error.format(),
        }
    }
}

/// Client request to start a conversion, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionRequest {
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub formats: Vec<String>,
}

impl ConversionRequest {
    pub fn new<T: Into<String>, F: Into<String>>(
        tables: impl IntoIterator<Item = T>,
        formats: impl IntoIterator<Item = F>,
    ) -> Self {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
            formats: formats.into_iter().map(Into::into).collect(),
        }
    }

    /// Validates against the discovered tables and collapses duplicates.
    /// Tables come back in discovery order, formats in canonical order.
    pub fn validate<F>(
        &self,
        discovered: &[TableDescriptor],
        supported: F,
    ) -> Result<Selection, ValidationError>
    where
        F: Fn(ExportFormat) -> bool,
    {
        if self.tables.is_empty() {
            return Err(ValidationError::NoTablesSelected);
        }
        if self.formats.is_empty() {
            return Err(ValidationError::NoFormatsSelected);
        }

        for requested in &self.tables {
            if !discovered.iter().any(|t| &t.name == requested) {
                return Err(ValidationError::UnknownTable(requested.clone()));
            }
        }

        let mut formats = Vec::new();
        for raw in &self.formats {
            let format = ExportFormat::parse(raw)
                .filter(|f| supported(*f))
                .ok_or_else(|| ValidationError::UnsupportedFormat(raw.clone()))?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        formats.sort();

        let tables = discovered
            .iter()
            .filter(|t| self.tables.contains(&t.name))
            .map(|t| t.name.clone())
            .collect();

        Ok(Selection { tables, formats })
    }
}

/// Validated selection: tables in discovery order, formats in canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub tables: Vec<String>,
    pub formats: Vec<ExportFormat>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub tables_total: usize,
    pub tables_completed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_table: Option<String>,
    pub bytes_written: u64,
    pub percentage: f64,
}

impl Progress {
    fn recompute(&mut self) {
        self.percentage = if self.tables_total == 0 {
            0.0
        } else {
            (self.tables_completed as f64 / self.tables_total as f64 * 1000.0).round() / 10.0
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFile {
    pub table: String,
    pub format: ExportFormat,
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub original_filename: String,
    pub source_path: PathBuf,
    pub source_size: u64,
    pub state: JobState,
    pub phase: JobPhase,
    pub message: String,
    pub tables: Option<Vec<TableDescriptor>>,
    pub selection: Option<Selection>,
    pub progress: Progress,
    pub outputs: Vec<OutputFile>,
    pub error: Option<JobError>,
    pub result_archive: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        original_filename: impl Into<String>,
        source_path: PathBuf,
        source_size: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            original_filename: original_filename.into(),
            source_path,
            source_size,
            state: JobState::Uploaded,
            phase: JobPhase::Uploaded,
            message: "File uploaded".to_string(),
            tables: None,
            selection: None,
            progress: Progress::default(),
            outputs: Vec::new(),
            error: None,
            result_archive: None,
            created_at: now,
            last_touched_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_touched_at = Utc::now();
    }

    fn transition(&mut self, next: JobState, operation: &'static str) -> Result<(), ConvertError> {
        if !self.state.can_transition_to(next) {
            return Err(self.invalid_state(operation));
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    pub fn invalid_state(&self, operation: &'static str) -> ConvertError {
        ConvertError::InvalidState {
            job_id: self.id.clone(),
            state: self.state,
            operation,
        }
    }

    /// Caches the discovered tables. `UPLOADED -> TABLES_LISTED`.
    pub fn record_tables(&mut self, tables: Vec<TableDescriptor>) -> Result<(), ConvertError> {
        if tables.is_empty() {
            return Err(crate::error::AdapterError::NoTables.into());
        }
        self.transition(JobState::TablesListed, "list tables")?;
        self.message = format!("Found {} tables", tables.len());
        self.tables = Some(tables);
        self.phase = JobPhase::TablesListed;
        Ok(())
    }

    /// Stores the selection and queues the job. `TABLES_LISTED -> CONVERTING`.
    pub fn accept_selection(&mut self, selection: Selection) -> Result<(), ConvertError> {
        if self.tables.as_ref().map_or(true, |t| t.is_empty()) {
            return Err(self.invalid_state("start conversion"));
        }
        self.transition(JobState::Converting, "start conversion")?;
        self.progress = Progress {
            tables_total: selection.tables.len(),
            ..Progress::default()
        };
        self.selection = Some(selection);
        self.phase = JobPhase::Queued;
        self.message = "Queued for conversion".to_string();
        Ok(())
    }

    /// A worker picked the job up.
    pub fn begin_export(&mut self) -> Result<(), ConvertError> {
        if self.state != JobState::Converting || self.phase != JobPhase::Queued {
            return Err(self.invalid_state("begin export"));
        }
        self.phase = JobPhase::Exporting;
        self.started_at = Some(Utc::now());
        self.message = "Starting export".to_string();
        self.touch();
        Ok(())
    }

    pub fn begin_table(&mut self, table: &str) {
        self.progress.current_table = Some(table.to_string());
        self.message = format!(
            "Exporting table {} ({}/{})",
            table,
            self.progress.tables_completed + 1,
            self.progress.tables_total
        );
        self.touch();
    }

    pub fn finish_table(&mut self, outputs: Vec<OutputFile>) {
        self.progress.bytes_written += outputs.iter().map(|o| o.size).sum::<u64>();
        self.progress.tables_completed += 1;
        self.progress.recompute();
        self.outputs.extend(outputs);
        self.touch();
    }

    /// `CONVERTING -> PACKAGING`.
    pub fn begin_packaging(&mut self) -> Result<(), ConvertError> {
        self.transition(JobState::Packaging, "package outputs")?;
        self.phase = JobPhase::Packaging;
        self.progress.current_table = None;
        self.message = "Creating archive".to_string();
        Ok(())
    }

    /// `PACKAGING -> DONE`. The archive must already exist on disk.
    pub fn complete(&mut self, archive: PathBuf) -> Result<(), ConvertError> {
        self.transition(JobState::Done, "complete")?;
        self.phase = JobPhase::Completed;
        self.result_archive = Some(archive);
        self.progress.percentage = 100.0;
        self.message = "Conversion completed".to_string();
        Ok(())
    }

    /// Any non-terminal state `-> FAILED`. The first failure wins.
    pub fn fail(&mut self, error: JobError) -> Result<(), ConvertError> {
        self.transition(JobState::Failed, "fail")?;
        self.phase = JobPhase::Failed;
        self.progress.current_table = None;
        self.message = error.message.clone();
        self.error = Some(error);
        Ok(())
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id.clone(),
            filename: self.original_filename.clone(),
            source_size: self.source_size,
            state: self.state,
            phase: self.phase.clone(),
            message: self.message.clone(),
            table_count: self.tables.as_ref().map(Vec::len),
            selection: self.selection.clone(),
            progress: self.progress.clone(),
            outputs: self.outputs.clone(),
            error: self.error.clone(),
            download_ready: self.state == JobState::Done,
            created_at: self.created_at,
            last_touched_at: self.last_touched_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id.clone(),
            filename: self.original_filename.clone(),
            state: self.state,
            phase: self.phase.clone(),
            percentage: self.progress.percentage,
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

/// Point-in-time copy of a job for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub filename: String,
    pub source_size: u64,
    pub state: JobState,
    pub phase: JobPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    pub progress: Progress,
    pub outputs: Vec<OutputFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub download_ready: bool,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub filename: String,
    pub state: JobState,
    pub phase: JobPhase,
    pub percentage: f64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Column;

    fn discovered() -> Vec<TableDescriptor> {
        vec![
            TableDescriptor::new("Customers", vec![Column::new("ID")]),
            TableDescriptor::new("Orders", vec![Column::new("ID")]),
            TableDescriptor::new("Products", vec![Column::new("ID")]),
        ]
    }

    fn job() -> Job {
        Job::new("job-1", "shop.mdb", PathBuf::from("/tmp/job-1_shop.mdb"), 10)
    }

    #[test]
    fn test_transition_table() {
        use JobState::*;
        assert!(Uploaded.can_transition_to(TablesListed));
        assert!(TablesListed.can_transition_to(Converting));
        assert!(Converting.can_transition_to(Packaging));
        assert!(Packaging.can_transition_to(Done));
        for state in [Uploaded, TablesListed, Converting, Packaging] {
            assert!(state.can_transition_to(Failed));
        }
        assert!(!Uploaded.can_transition_to(Converting));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
        assert!(!Converting.can_transition_to(TablesListed));
    }

    #[test]
    fn test_state_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&JobState::TablesListed).unwrap(),
            "\"TABLES_LISTED\""
        );
    }

    #[test]
    fn test_validate_orders_and_dedupes() {
        let request = ConversionRequest::new(
            ["Products", "Customers", "Products"],
            ["json", "CSV", "json"],
        );
        let selection = request.validate(&discovered(), |_| true).unwrap();
        assert_eq!(selection.tables, vec!["Customers", "Products"]);
        assert_eq!(selection.formats, vec![ExportFormat::Csv, ExportFormat::Json]);
    }

    #[test]
    fn test_validate_rejections() {
        let tables = discovered();
        let empty_tables = ConversionRequest::new(Vec::<String>::new(), ["csv"]);
        assert_eq!(
            empty_tables.validate(&tables, |_| true),
            Err(ValidationError::NoTablesSelected)
        );

        let empty_formats = ConversionRequest::new(["Orders"], Vec::<String>::new());
        assert_eq!(
            empty_formats.validate(&tables, |_| true),
            Err(ValidationError::NoFormatsSelected)
        );

        let unknown = ConversionRequest::new(["Invoices"], ["csv"]);
        assert_eq!(
            unknown.validate(&tables, |_| true),
            Err(ValidationError::UnknownTable("Invoices".into()))
        );

        let bad_format = ConversionRequest::new(["Orders"], ["docx"]);
        assert_eq!(
            bad_format.validate(&tables, |_| true),
            Err(ValidationError::UnsupportedFormat("docx".into()))
        );

        let unregistered = ConversionRequest::new(["Orders"], ["pdf"]);
        assert_eq!(
            unregistered.validate(&tables, |f| f != ExportFormat::Pdf),
            Err(ValidationError::UnsupportedFormat("pdf".into()))
        );
    }

    #[test]
    fn test_happy_path_lifecycle() {
        let mut job = job();
        job.record_tables(discovered()).unwrap();
        assert_eq!(job.state, JobState::TablesListed);

        let selection = ConversionRequest::new(["Customers", "Orders"], ["csv"])
            .validate(job.tables.as_deref().unwrap(), |_| true)
            .unwrap();
        job.accept_selection(selection).unwrap();
        assert_eq!(job.state, JobState::Converting);
        assert_eq!(job.phase, JobPhase::Queued);

        job.begin_export().unwrap();
        assert_eq!(job.phase, JobPhase::Exporting);
        assert!(job.started_at.is_some());

        job.begin_table("Customers");
        job.finish_table(vec![OutputFile {
            table: "Customers".into(),
            format: ExportFormat::Csv,
            file_name: "Customers.csv".into(),
            size: 40,
        }]);
        assert_eq!(job.progress.percentage, 50.0);
        assert_eq!(job.progress.bytes_written, 40);

        job.begin_packaging().unwrap();
        job.complete(PathBuf::from("/tmp/job-1_export.zip")).unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.progress.percentage, 100.0);
        assert!(job.finished_at.is_some());
        assert!(job.snapshot().download_ready);
    }

    #[test]
    fn test_record_tables_rejects_empty_and_repeats() {
        let mut job = job();
        assert!(job.record_tables(vec![]).is_err());
        assert_eq!(job.state, JobState::Uploaded);

        job.record_tables(discovered()).unwrap();
        let err = job.record_tables(discovered()).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidState { .. }));
    }

    #[test]
    fn test_fail_is_written_once() {
        let mut job = job();
        job.fail(JobError::new(ErrorKind::Cancelled, "Conversion cancelled"))
            .unwrap();
        assert_eq!(job.state, JobState::Failed);

        let err = job
            .fail(JobError::new(ErrorKind::Timeout, "late"))
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidState { .. }));
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_selection_requires_listed_tables() {
        let mut job = job();
        let selection = Selection {
            tables: vec!["Customers".into()],
            formats: vec![ExportFormat::Csv],
        };
        assert!(job.accept_selection(selection).is_err());
        assert_eq!(job.state, JobState::Uploaded);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let mut job = job();
        job.record_tables(discovered()).unwrap();
        let value = serde_json::to_value(job.snapshot()).unwrap();
        assert_eq!(value["jobId"], "job-1");
        assert_eq!(value["state"], "TABLES_LISTED");
        assert_eq!(value["phase"], "tables_listed");
        assert_eq!(value["tableCount"], 3);
        assert_eq!(value["downloadReady"], false);
        assert!(value.get("error").is_none());
    }
}
