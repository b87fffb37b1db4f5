//! Packages a job's output files into one ZIP.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::StorageError;

/// Writes `files` into a new archive at `archive_path`, each under its file
/// name only. Returns the archive size.
///
/// On any failure the partial archive is removed before returning.
pub fn write_archive(archive_path: &Path, files: &[PathBuf]) -> Result<u64, StorageError> {
    match build(archive_path, files) {
        Ok(size) => Ok(size),
        Err(e) => {
            if let Err(remove_err) = std::fs::remove_file(archive_path) {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    log::warn!(
                        "Failed to remove partial archive {}: {}",
                        archive_path.display(),
                        remove_err
                    );
                }
            }
            Err(e)
        }
    }
}

fn archive_error(path: &Path, message: impl ToString) -> StorageError {
    StorageError::Archive {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn build(archive_path: &Path, files: &[PathBuf]) -> Result<u64, StorageError> {
    let file = File::create(archive_path).map_err(|e| StorageError::WriteFile {
        path: archive_path.to_path_buf(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| archive_error(path, "output file has no usable name"))?;

        let mut source = File::open(path).map_err(|e| archive_error(path, e))?;
        zip.start_file(name, options)
            .map_err(|e| archive_error(archive_path, e))?;
        io::copy(&mut source, &mut zip).map_err(|e| archive_error(archive_path, e))?;
    }

    let mut writer = zip.finish().map_err(|e| archive_error(archive_path, e))?;
    writer.flush().map_err(|e| archive_error(archive_path, e))?;
    drop(writer);

    std::fs::metadata(archive_path)
        .map(|m| m.len())
        .map_err(|e| archive_error(archive_path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_archive_contains_file_names_only() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("job");
        std::fs::create_dir_all(&nested).unwrap();
        let a = nested.join("Customers.csv");
        let b = nested.join("Customers.json");
        std::fs::write(&a, "id\n1\n").unwrap();
        std::fs::write(&b, "[]").unwrap();

        let archive = dir.path().join("job_export.zip");
        let size = write_archive(&archive, &[a, b]).unwrap();
        assert!(size > 0);

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["Customers.csv", "Customers.json"]);

        let mut content = String::new();
        zip.by_name("Customers.csv")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "id\n1\n");
    }

    #[test]
    fn test_partial_archive_is_removed_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.csv");
        std::fs::write(&present, "x").unwrap();
        let missing = dir.path().join("gone.csv");

        let archive = dir.path().join("out.zip");
        let err = write_archive(&archive, &[present, missing]).unwrap_err();

        assert!(matches!(err, StorageError::Archive { .. }));
        assert!(!archive.exists());
    }
}
