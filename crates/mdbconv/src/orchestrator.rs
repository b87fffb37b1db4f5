//! Job orchestration: the synchronous operations clients call, and the
//! hand-off of accepted jobs to the worker pool.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::{JobPhase, JobProgressBroadcaster};
use crate::config::Settings;
use crate::error::{AdapterError, ConvertError, Result};
use crate::export::{EncoderRegistry, ExportFormat};
use crate::job::{
    ConversionRequest, Job, JobCell, JobError, JobRegistry, JobSnapshot, JobState, JobSummary,
};
use crate::pipeline::{BroadcastProgress, ConversionRunner, ProgressReporter};
use crate::reader::{MdbToolsReader, ReaderDiagnostics, TableDescriptor, TableReader};
use crate::sanitize;
use crate::storage::{ExportStore, UploadStore};
use crate::worker::{JobHandler, WorkerPool};

/// A finished file ready to be streamed to a client.
#[derive(Debug, Clone)]
pub struct FileDownload {
    pub path: PathBuf,
    /// Name offered to the client, e.g. `{original stem}_export.zip`.
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

impl FileDownload {
    fn stat(job_id: &str, path: PathBuf, file_name: String) -> Result<Self> {
        let size = std::fs::metadata(&path).map(|m| m.len()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConvertError::NotFound(format!("output of job {}", job_id))
            } else {
                ConvertError::System(format!("output of job {} unreadable: {}", job_id, e))
            }
        })?;

        Ok(Self {
            content_type: mime_guess::from_path(&path)
                .first_or_octet_stream()
                .to_string(),
            file_name,
            path,
            size,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCounts {
    pub uploaded: usize,
    pub tables_listed: usize,
    pub converting: usize,
    pub packaging: usize,
    pub done: usize,
    pub failed: usize,
}

impl StateCounts {
    fn add(&mut self, state: JobState) {
        let slot = match state {
            JobState::Uploaded => &mut self.uploaded,
            JobState::TablesListed => &mut self.tables_listed,
            JobState::Converting => &mut self.converting,
            JobState::Packaging => &mut self.packaging,
            JobState::Done => &mut self.done,
            JobState::Failed => &mut self.failed,
        };
        *slot += 1;
    }
}

/// Registry and queue figures for health reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStats {
    pub total: usize,
    pub states: StateCounts,
    /// Accepted jobs waiting for a worker.
    pub queued: usize,
    /// Jobs held by a worker.
    pub active: usize,
    pub max_concurrent: usize,
}

/// Looks the job up by id and runs it. Jobs deleted while queued are skipped.
struct RegistryHandler {
    registry: Arc<JobRegistry>,
    runner: ConversionRunner,
    reporter: Arc<dyn ProgressReporter>,
}

impl JobHandler for RegistryHandler {
    fn handle(&self, job_id: &str) {
        match self.registry.find(job_id) {
            Some(cell) => self.runner.run(&cell),
            None => debug!(job_id, "Queued job no longer registered"),
        }
    }

    fn abandon(&self, job_id: &str) {
        let Some(cell) = self.registry.find(job_id) else {
            return;
        };
        let record = JobError::from_error(&ConvertError::System(
            "conversion worker panicked".to_string(),
        ));
        if cell.update(|job| job.fail(record)).is_ok() {
            self.reporter.report(&cell.snapshot());
        }
    }
}

pub struct Orchestrator {
    settings: Settings,
    registry: Arc<JobRegistry>,
    reader: Arc<dyn TableReader>,
    encoders: Arc<EncoderRegistry>,
    uploads: UploadStore,
    exports: ExportStore,
    reporter: Arc<dyn ProgressReporter>,
    pool: WorkerPool,
}

impl Orchestrator {
    /// Production wiring: mdbtools reader, every encoder, broadcast progress.
    pub fn from_settings(settings: Settings, broadcaster: JobProgressBroadcaster) -> Self {
        let reader = Arc::new(MdbToolsReader::new(settings.mdbtools_path.clone()));
        Self::new(
            settings,
            reader,
            EncoderRegistry::new(),
            Arc::new(BroadcastProgress::new(broadcaster)),
        )
    }

    pub fn new(
        settings: Settings,
        reader: Arc<dyn TableReader>,
        encoders: EncoderRegistry,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let encoders = Arc::new(encoders);
        let uploads = UploadStore::new(
            &settings.upload_dir,
            settings.max_upload_size,
            &settings.allowed_extensions,
        );
        let exports = ExportStore::new(&settings.export_dir);

        let runner = ConversionRunner::new(
            Arc::clone(&reader),
            Arc::clone(&encoders),
            exports.clone(),
            Arc::clone(&reporter),
        )
        .with_timeout(settings.job_timeout());

        let handler = Arc::new(RegistryHandler {
            registry: Arc::clone(&registry),
            runner,
            reporter: Arc::clone(&reporter),
        });
        let pool = WorkerPool::new(settings.max_concurrent_jobs.max(1), handler);

        Self {
            settings,
            registry,
            reader,
            encoders,
            uploads,
            exports,
            reporter,
            pool,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    pub fn exports(&self) -> &ExportStore {
        &self.exports
    }

    pub(crate) fn publish(&self, cell: &JobCell) {
        self.reporter.report(&cell.snapshot());
    }

    /// Persists an uploaded database and creates its job in `UPLOADED`.
    ///
    /// Nothing is registered and no file remains when validation fails.
    pub fn register_upload<R: Read>(&self, filename: &str, content: R) -> Result<JobSnapshot> {
        let job_id = Uuid::new_v4().to_string();
        let stored = self.uploads.save(&job_id, filename, content)?;

        let job = Job::new(&job_id, stored.filename, stored.path, stored.size);
        let cell = self.registry.insert(job);
        info!(
            job_id = %job_id,
            size = stored.size,
            "Registered upload {}",
            sanitize::redact_path(&cell.read().source_path)
        );

        self.publish(&cell);
        Ok(cell.snapshot())
    }

    /// Discovers the user tables of a job once and caches them.
    ///
    /// Reader failures leave the job in `UPLOADED` so the call can be
    /// retried.
    pub fn list_tables(&self, job_id: &str) -> Result<Vec<TableDescriptor>> {
        let cell = self.registry.get(job_id)?;
        if let Some(tables) = cell.read().tables.clone() {
            return Ok(tables);
        }

        let _discovery = cell.discovery_guard();
        let source = {
            let job = cell.read();
            if let Some(tables) = &job.tables {
                return Ok(tables.clone());
            }
            if job.state != JobState::Uploaded {
                return Err(job.invalid_state("list tables"));
            }
            job.source_path.clone()
        };

        let tables = match self.discover(&source) {
            Ok(tables) => tables,
            Err(e) => {
                warn!(job_id, error = %e, "Table discovery failed");
                return Err(e.into());
            }
        };

        cell.update(|job| job.record_tables(tables.clone()))?;
        info!(job_id, tables = tables.len(), "Tables listed");
        self.publish(&cell);
        Ok(tables)
    }

    fn discover(&self, source: &Path) -> std::result::Result<Vec<TableDescriptor>, AdapterError> {
        let tables: Vec<TableDescriptor> = self
            .reader
            .open_tables(source)?
            .into_iter()
            .filter(|t| !t.is_system_table())
            .collect();

        if tables.is_empty() {
            return Err(AdapterError::NoTables);
        }
        let limit = self.settings.max_tables_per_db;
        if tables.len() > limit {
            return Err(AdapterError::TooManyTables {
                count: tables.len(),
                limit,
            });
        }
        Ok(tables)
    }

    /// Validates the selection, moves the job to `CONVERTING` and queues it.
    pub fn start_conversion(&self, job_id: &str, request: &ConversionRequest) -> Result<JobSnapshot> {
        let cell = self.registry.get(job_id)?;

        cell.update(|job| -> Result<()> {
            if job.state != JobState::TablesListed {
                return Err(job.invalid_state("start conversion"));
            }
            let discovered = job.tables.as_deref().unwrap_or(&[]);
            let selection = request.validate(discovered, |f| self.encoders.supports(f))?;
            job.accept_selection(selection)
        })?;
        self.publish(&cell);

        if let Err(e) = self.pool.submit(job_id) {
            warn!(job_id, error = %e, "Could not queue conversion");
            let record = JobError::from_error(&e);
            let _ = cell.update(|job| job.fail(record));
            self.publish(&cell);
            return Err(e);
        }

        info!(job_id, "Conversion queued");
        Ok(cell.snapshot())
    }

    pub fn status(&self, job_id: &str) -> Result<JobSnapshot> {
        Ok(self.registry.get(job_id)?.snapshot())
    }

    pub fn archive(&self, job_id: &str) -> Result<FileDownload> {
        let cell = self.registry.get(job_id)?;
        let job = cell.read();

        let path = match (&job.result_archive, job.state) {
            (Some(path), JobState::Done) => path.clone(),
            _ => {
                return Err(ConvertError::NotReady {
                    job_id: job.id.clone(),
                    state: job.state,
                })
            }
        };

        FileDownload::stat(
            &job.id,
            path,
            sanitize::archive_download_name(&job.original_filename),
        )
    }

    /// One exported file of a finished job.
    ///
    /// Without `format` the first output of `table` is returned, in the order
    /// the formats were written.
    pub fn table_output(
        &self,
        job_id: &str,
        table: &str,
        format: Option<ExportFormat>,
    ) -> Result<FileDownload> {
        let cell = self.registry.get(job_id)?;
        let job = cell.read();

        if job.state != JobState::Done {
            return Err(ConvertError::NotReady {
                job_id: job.id.clone(),
                state: job.state,
            });
        }

        let output = job
            .outputs
            .iter()
            .filter(|o| o.table == table)
            .find(|o| format.map_or(true, |f| o.format == f))
            .ok_or_else(|| match format {
                Some(f) => ConvertError::NotFound(format!("{} export of table '{}'", f, table)),
                None => ConvertError::NotFound(format!("export of table '{}'", table)),
            })?;

        FileDownload::stat(
            &job.id,
            self.exports.job_dir(&job.id).join(&output.file_name),
            output.file_name.clone(),
        )
    }

    /// Availability of the table reader and its external tools.
    pub fn diagnostics(&self) -> ReaderDiagnostics {
        self.reader.diagnose()
    }

    /// Cancels a job that has not finished yet.
    ///
    /// Jobs without a worker fail right away; a converting job fails at the
    /// next table boundary.
    pub fn cancel(&self, job_id: &str) -> Result<JobSnapshot> {
        let cell = self.registry.get(job_id)?;

        let failed_now = cell.update(|job| -> Result<bool> {
            match job.state {
                JobState::Uploaded | JobState::TablesListed => {
                    job.fail(JobError::from_error(&ConvertError::Cancelled))?;
                    Ok(true)
                }
                JobState::Converting => Ok(false),
                JobState::Packaging | JobState::Done | JobState::Failed => {
                    Err(job.invalid_state("cancel"))
                }
            }
        })?;

        if failed_now {
            info!(job_id, "Cancelled job before conversion");
            self.publish(&cell);
        } else {
            info!(job_id, "Cancellation requested");
            cell.request_cancel();
        }
        Ok(cell.snapshot())
    }

    /// Removes a finished job and its files.
    pub fn delete(&self, job_id: &str) -> Result<()> {
        let cell = self.registry.get(job_id)?;
        let Some(removed) = self
            .registry
            .remove_if(job_id, |job| job.state.is_terminal())
        else {
            return match self.registry.find(job_id) {
                Some(_) => Err(cell.read().invalid_state("delete")),
                None => Err(ConvertError::NotFound(format!("job {}", job_id))),
            };
        };

        self.remove_files(&removed);
        info!(job_id, "Deleted job");
        Ok(())
    }

    /// Deletes everything a job owns on disk. Failures are logged; leftovers
    /// are picked up as orphans.
    pub(crate) fn remove_files(&self, cell: &JobCell) {
        let source = cell.read().source_path.clone();
        if let Err(e) = self.uploads.remove(&source) {
            warn!(job_id = cell.id(), error = %e, "Failed to remove upload");
        }
        if let Err(e) = self.exports.remove_job(cell.id()) {
            warn!(job_id = cell.id(), error = %e, "Failed to remove exports");
        }
    }

    /// Newest first.
    pub fn list_jobs(&self, limit: Option<usize>) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self
            .registry
            .cells()
            .iter()
            .map(|cell| cell.read().summary())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        jobs
    }

    pub fn stats(&self) -> OrchestratorStats {
        let mut states = StateCounts::default();
        let mut queued = 0;
        let cells = self.registry.cells();

        for cell in &cells {
            let job = cell.read();
            states.add(job.state);
            if job.state == JobState::Converting && job.phase == JobPhase::Queued {
                queued += 1;
            }
        }

        OrchestratorStats {
            total: cells.len(),
            states,
            queued,
            active: self.pool.active_count(),
            max_concurrent: self.pool.worker_count(),
        }
    }

    /// Stops accepting conversions and waits for queued ones to finish.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        self.pool.wait();
    }
}
