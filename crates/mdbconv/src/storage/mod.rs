pub mod exports;
pub mod upload;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

use crate::error::StorageError;

pub use exports::ExportStore;
pub use upload::{StoredUpload, UploadStore};

/// Length of a hyphenated UUID, the prefix of every name we create.
const JOB_ID_LEN: usize = 36;

pub(crate) fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Removes a file or a directory tree. A missing path is not an error.
pub fn remove_path(path: &Path) -> Result<(), StorageError> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Job id an upload or export entry belongs to, judged by its name prefix.
pub fn owner_job_id(name: &str) -> Option<&str> {
    let prefix = name.get(..JOB_ID_LEN)?;
    uuid::Uuid::parse_str(prefix).ok()?;
    match name[JOB_ID_LEN..].chars().next() {
        None | Some('_') | Some('.') => Some(prefix),
        Some(_) => None,
    }
}

/// Top-level entries of `dir` created for a job that `is_known` no longer
/// recognises and that have not been modified for `max_age`.
///
/// Entries without a job-id prefix were not created by us and are skipped.
pub fn find_orphans<F>(dir: &Path, is_known: F, max_age: Duration) -> Vec<PathBuf>
where
    F: Fn(&str) -> bool,
{
    let now = SystemTime::now();
    let mut orphans = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let Some(job_id) = owner_job_id(name) else {
            log::debug!("Skipping foreign entry in {}: {}", dir.display(), name);
            continue;
        };
        if is_known(job_id) {
            continue;
        }

        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok());
        if matches!(age, Some(age) if age > max_age) {
            orphans.push(entry.path().to_path_buf());
        }
    }

    orphans
}
