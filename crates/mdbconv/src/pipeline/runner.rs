use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span, warn};

use crate::error::{ConvertError, EncodeError, ErrorKind};
use crate::export::{archive, EncoderRegistry, ExportFormat};
use crate::job::{JobCell, JobError, OutputFile};
use crate::reader::{TableDescriptor, TableReader};
use crate::sanitize;
use crate::storage::ExportStore;

use super::progress::ProgressReporter;

/// Executes one accepted job: every selected table in every selected
/// format, then the archive.
///
/// The runner is the only writer of a job from the moment a worker picks it
/// up. The job lock is taken for in-memory updates only, never across
/// reader or encoder I/O.
pub struct ConversionRunner {
    reader: Arc<dyn TableReader>,
    encoders: Arc<EncoderRegistry>,
    exports: ExportStore,
    reporter: Arc<dyn ProgressReporter>,
    timeout: Option<Duration>,
}

/// Everything the conversion needs, copied out of the job once.
struct Plan {
    job_id: String,
    source_path: PathBuf,
    tables: Vec<TableDescriptor>,
    formats: Vec<ExportFormat>,
}

impl ConversionRunner {
    pub fn new(
        reader: Arc<dyn TableReader>,
        encoders: Arc<EncoderRegistry>,
        exports: ExportStore,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            reader,
            encoders,
            exports,
            reporter,
            timeout: None,
        }
    }

    /// Jobs running longer than `timeout` fail at the next table boundary.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn run(&self, cell: &JobCell) {
        let filename = sanitize::redact_path(&cell.read().source_path);
        let _convert_span = info_span!("convert", job_id = %cell.id(), filename = %filename)
            .entered();

        if let Err(e) = cell.update(|job| job.begin_export()) {
            warn!(error = %e, "Skipping job that is no longer queued");
            return;
        }
        self.publish(cell);
        let started = Instant::now();

        match self.execute(cell, started) {
            Ok(archive) => {
                info!(
                    archive = %sanitize::redact_path(&archive),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Conversion completed"
                );
            }
            Err(e) => self.fail(cell, &e),
        }
        self.publish(cell);
    }

    fn execute(&self, cell: &JobCell, started: Instant) -> Result<PathBuf, ConvertError> {
        let plan = self.plan(cell)?;
        self.exports.prepare_job_dir(&plan.job_id)?;

        let names: Vec<&str> = plan.tables.iter().map(|t| t.name.as_str()).collect();
        let stems = sanitize::unique_file_stems(&names);
        let mut produced = Vec::new();

        for (table, stem) in plan.tables.iter().zip(&stems) {
            self.check_interrupt(cell, started)?;

            let _table_span = info_span!("table", table = %table.name).entered();
            cell.update(|job| job.begin_table(&table.name));
            self.publish(cell);

            let outputs = self.export_table(&plan, table, stem)?;
            produced.extend(
                outputs
                    .iter()
                    .map(|o| self.exports.job_dir(&plan.job_id).join(&o.file_name)),
            );
            cell.update(|job| job.finish_table(outputs));
            self.publish(cell);
        }

        {
            let _step = info_span!("package").entered();
            cell.update(|job| job.begin_packaging())?;
            self.publish(cell);

            let archive_path = self.exports.archive_path(&plan.job_id);
            let size = archive::write_archive(&archive_path, &produced)?;
            debug!(files = produced.len(), size, "Archive written");

            if let Err(e) = cell.update(|job| job.complete(archive_path.clone())) {
                if let Err(remove_err) = crate::storage::remove_path(&archive_path) {
                    warn!(error = %remove_err, "Failed to remove archive of failed job");
                }
                return Err(e);
            }
            Ok(archive_path)
        }
    }

    fn plan(&self, cell: &JobCell) -> Result<Plan, ConvertError> {
        let job = cell.read();
        let selection = job
            .selection
            .as_ref()
            .ok_or_else(|| ConvertError::System(format!("job {} has no selection", job.id)))?;
        let discovered = job
            .tables
            .as_deref()
            .ok_or_else(|| ConvertError::System(format!("job {} has no tables", job.id)))?;

        let mut tables = Vec::with_capacity(selection.tables.len());
        for name in &selection.tables {
            let table = discovered
                .iter()
                .find(|t| &t.name == name)
                .ok_or_else(|| {
                    ConvertError::System(format!("table '{}' missing from job {}", name, job.id))
                })?;
            tables.push(table.clone());
        }

        Ok(Plan {
            job_id: job.id.clone(),
            source_path: job.source_path.clone(),
            tables,
            formats: selection.formats.clone(),
        })
    }

    fn check_interrupt(&self, cell: &JobCell, started: Instant) -> Result<(), ConvertError> {
        if cell.is_cancel_requested() {
            return Err(ConvertError::Cancelled);
        }
        match self.timeout {
            Some(limit) if started.elapsed() >= limit => Err(ConvertError::Timeout {
                minutes: limit.as_secs() / 60,
            }),
            _ => Ok(()),
        }
    }

    fn export_table(
        &self,
        plan: &Plan,
        table: &TableDescriptor,
        stem: &str,
    ) -> Result<Vec<OutputFile>, ConvertError> {
        let mut outputs = Vec::with_capacity(plan.formats.len());

        for &format in &plan.formats {
            let encoder = self.encoders.get(format).ok_or_else(|| {
                ConvertError::System(format!("no encoder registered for {}", format))
            })?;

            let rows = self
                .reader
                .read_rows(&plan.source_path, table)
                .map_err(|source| ConvertError::TableRead {
                    table: table.name.clone(),
                    source,
                })?;

            let path = self.exports.output_path(&plan.job_id, stem, format);
            let size = encoder
                .encode(table, rows, &path)
                .map_err(|e| encode_failure(table, format, e))?;
            debug!(format = %format, size, "Wrote {}", file_name(&path));

            outputs.push(OutputFile {
                table: table.name.clone(),
                format,
                file_name: file_name(&path),
                size,
            });
        }

        Ok(outputs)
    }

    fn fail(&self, cell: &JobCell, error: &ConvertError) {
        match error.kind() {
            ErrorKind::System => error!(error = %error, "Conversion failed"),
            ErrorKind::Cancelled => info!("Conversion cancelled"),
            _ => warn!(error = %error, "Conversion failed"),
        }

        let record = JobError::from_error(error);
        if let Err(e) = cell.update(|job| job.fail(record)) {
            warn!(error = %e, "Could not record conversion failure");
        }
    }

    fn publish(&self, cell: &JobCell) {
        self.reporter.report(&cell.snapshot());
    }
}

/// Row errors surfacing through an encoder belong to the reader.
fn encode_failure(table: &TableDescriptor, format: ExportFormat, error: EncodeError) -> ConvertError {
    match error {
        EncodeError::Rows(source) => ConvertError::TableRead {
            table: table.name.clone(),
            source,
        },
        other => ConvertError::Encoder {
            table: table.name.clone(),
            format,
            source: other,
        },
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::export::TableEncoder;
    use crate::job::{ConversionRequest, Job, JobRegistry, JobState};
    use crate::pipeline::NoopProgress;
    use crate::reader::{CellValue, Column, MemoryReader, RowStream};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        registry: JobRegistry,
        exports: ExportStore,
        source: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("shop.mdb");
        std::fs::write(&source, b"access").unwrap();
        Fixture {
            exports: ExportStore::new(dir.path().join("exports")),
            registry: JobRegistry::new(),
            source,
            _dir: dir,
        }
    }

    fn reader() -> MemoryReader {
        MemoryReader::new()
            .with_table(
                TableDescriptor::new("Customers", vec![Column::new("ID"), Column::new("Name")]),
                vec![
                    vec![CellValue::Integer(1), CellValue::from("Ada")],
                    vec![CellValue::Integer(2), CellValue::from("Linus")],
                ],
            )
            .with_table(
                TableDescriptor::new("Orders", vec![Column::new("ID")]),
                vec![vec![CellValue::Integer(10)]],
            )
    }

    fn queue_job(fx: &Fixture, reader: &dyn TableReader, tables: &[&str], formats: &[&str]) -> Arc<JobCell> {
        let mut job = Job::new("job-1", "shop.mdb", fx.source.clone(), 6);
        job.record_tables(reader.open_tables(&fx.source).unwrap()).unwrap();
        let selection = ConversionRequest::new(tables.iter().copied(), formats.iter().copied())
            .validate(job.tables.as_deref().unwrap(), |_| true)
            .unwrap();
        job.accept_selection(selection).unwrap();
        fx.registry.insert(job)
    }

    fn runner(fx: &Fixture, reader: Arc<dyn TableReader>) -> ConversionRunner {
        ConversionRunner::new(
            reader,
            Arc::new(EncoderRegistry::new()),
            fx.exports.clone(),
            Arc::new(NoopProgress),
        )
    }

    #[test]
    fn test_run_exports_and_packages() {
        let fx = fixture();
        let reader = Arc::new(reader());
        let cell = queue_job(&fx, reader.as_ref(), &["Orders", "Customers"], &["json", "csv"]);

        runner(&fx, reader).run(&cell);

        let job = cell.read();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.progress.tables_completed, 2);
        assert_eq!(job.outputs.len(), 4);
        assert_eq!(job.outputs[0].file_name, "Customers.csv");
        assert_eq!(job.outputs[1].file_name, "Customers.json");
        assert!(job.result_archive.as_ref().unwrap().exists());
        assert!(fx.exports.job_dir("job-1").join("Orders.json").exists());
    }

    #[test]
    fn test_cancel_before_first_table() {
        let fx = fixture();
        let reader = Arc::new(reader());
        let cell = queue_job(&fx, reader.as_ref(), &["Orders"], &["csv"]);
        cell.request_cancel();

        runner(&fx, reader).run(&cell);

        let job = cell.read();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
        assert!(job.outputs.is_empty());
        assert!(job.result_archive.is_none());
    }

    #[test]
    fn test_zero_timeout_fails_immediately() {
        let fx = fixture();
        let reader = Arc::new(reader());
        let cell = queue_job(&fx, reader.as_ref(), &["Orders"], &["csv"]);

        runner(&fx, reader)
            .with_timeout(Some(Duration::ZERO))
            .run(&cell);

        assert_eq!(cell.read().error.as_ref().unwrap().kind, ErrorKind::Timeout);
    }

    struct BrokenEncoder;

    impl TableEncoder for BrokenEncoder {
        fn format(&self) -> ExportFormat {
            ExportFormat::Pdf
        }

        fn encode(&self, _: &TableDescriptor, _: RowStream, _: &Path) -> Result<u64, EncodeError> {
            Err(EncodeError::Pdf("font table exhausted".into()))
        }
    }

    #[test]
    fn test_encoder_failure_names_table_and_format() {
        let fx = fixture();
        let reader = Arc::new(reader());
        let cell = queue_job(&fx, reader.as_ref(), &["Customers"], &["csv", "pdf"]);

        let mut encoders = EncoderRegistry::new();
        encoders.register(Box::new(BrokenEncoder));
        ConversionRunner::new(
            reader,
            Arc::new(encoders),
            fx.exports.clone(),
            Arc::new(NoopProgress),
        )
        .run(&cell);

        let job = cell.read();
        let error = job.error.as_ref().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(error.kind, ErrorKind::Encoder);
        assert_eq!(error.table.as_deref(), Some("Customers"));
        assert_eq!(error.format, Some(ExportFormat::Pdf));
        assert!(!fx.exports.archive_path("job-1").exists());
        // Partial outputs stay on disk.
        assert!(fx.exports.job_dir("job-1").join("Customers.csv").exists());
    }

    #[test]
    fn test_row_failure_is_reader_error() {
        assert!(matches!(
            encode_failure(
                &TableDescriptor::new("T", vec![]),
                ExportFormat::Csv,
                EncodeError::Rows(AdapterError::RowRead {
                    table: "T".into(),
                    message: "bad page".into()
                })
            ),
            ConvertError::TableRead { .. }
        ));
    }
}
