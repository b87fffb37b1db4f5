use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::export::ExportFormat;

use super::{ensure_directory, remove_path};

/// Layout of conversion output:
///
/// ```text
/// {export_dir}/{job_id}/{table}.{ext}
/// {export_dir}/{job_id}_export.zip
/// ```
#[derive(Debug, Clone)]
pub struct ExportStore {
    export_dir: PathBuf,
}

impl ExportStore {
    pub fn new<P: AsRef<Path>>(export_dir: P) -> Self {
        Self {
            export_dir: export_dir.as_ref().to_path_buf(),
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.export_dir.join(job_id)
    }

    pub fn archive_path(&self, job_id: &str) -> PathBuf {
        self.export_dir.join(format!("{}_export.zip", job_id))
    }

    pub fn output_path(&self, job_id: &str, stem: &str, format: ExportFormat) -> PathBuf {
        self.job_dir(job_id)
            .join(format!("{}.{}", stem, format.extension()))
    }

    /// Creates the job's output directory and returns it.
    pub fn prepare_job_dir(&self, job_id: &str) -> Result<PathBuf, StorageError> {
        let dir = self.job_dir(job_id);
        ensure_directory(&dir)?;
        Ok(dir)
    }

    /// Deletes the output directory and the archive of a job.
    pub fn remove_job(&self, job_id: &str) -> Result<(), StorageError> {
        remove_path(&self.job_dir(job_id))?;
        remove_path(&self.archive_path(job_id))
    }
}
