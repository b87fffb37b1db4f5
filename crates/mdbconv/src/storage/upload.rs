use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{ConvertError, StorageError, ValidationError};
use crate::sanitize::sanitize_file_name;

use super::{ensure_directory, remove_path};

/// An upload that was fully written and passed validation.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub path: PathBuf,
    /// Client filename with any directory part removed.
    pub filename: String,
    pub size: u64,
}

/// Persists uploaded databases under `{upload_dir}/{job_id}_{filename}`.
///
/// Validates the extension and size only; the content is the table
/// reader's business.
#[derive(Debug, Clone)]
pub struct UploadStore {
    upload_dir: PathBuf,
    max_size: u64,
    allowed_extensions: Vec<String>,
}

impl UploadStore {
    pub fn new<P: AsRef<Path>>(upload_dir: P, max_size: u64, allowed_extensions: &[String]) -> Self {
        Self {
            upload_dir: upload_dir.as_ref().to_path_buf(),
            max_size,
            allowed_extensions: allowed_extensions.iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Checks a client filename and returns it stripped of any directory part.
    pub fn validate_filename(&self, filename: &str) -> Result<String, ValidationError> {
        // Browsers on Windows may send the full client path.
        let name = filename
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or("")
            .trim();
        if name.is_empty() {
            return Err(ValidationError::MissingFilename);
        }

        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();

        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::UnsupportedExtension {
                extension: if extension.is_empty() {
                    "(none)".to_string()
                } else {
                    extension
                },
                allowed: self.allowed_extensions.clone(),
            });
        }

        Ok(name.to_string())
    }

    /// Streams `content` to disk, enforcing the size limit while copying.
    /// Nothing is left behind when validation or the write fails.
    pub fn save<R: Read>(
        &self,
        job_id: &str,
        filename: &str,
        content: R,
    ) -> Result<StoredUpload, ConvertError> {
        let filename = self.validate_filename(filename)?;
        ensure_directory(&self.upload_dir)?;

        let stored_name = format!("{}_{}", job_id, sanitize_file_name(&filename, "upload"));
        let path = self.upload_dir.join(stored_name);

        match self.write_limited(&path, content) {
            Ok(size) if size > self.max_size => {
                self.discard(&path);
                Err(ValidationError::TooLarge {
                    limit: self.max_size,
                }
                .into())
            }
            Ok(0) => {
                self.discard(&path);
                Err(ValidationError::EmptyFile.into())
            }
            Ok(size) => Ok(StoredUpload {
                path,
                filename,
                size,
            }),
            Err(e) => {
                self.discard(&path);
                Err(e.into())
            }
        }
    }

    /// Copies at most `max_size + 1` bytes, so an oversized upload is
    /// detected without reading it to the end.
    fn write_limited<R: Read>(&self, path: &Path, content: R) -> Result<u64, StorageError> {
        let write_error = |e: io::Error| StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(write_error)?;

        let mut limited = content.take(self.max_size.saturating_add(1));
        let copied = io::copy(&mut limited, &mut file).map_err(write_error)?;
        file.flush().map_err(write_error)?;
        Ok(copied)
    }

    fn discard(&self, path: &Path) {
        if let Err(e) = remove_path(path) {
            log::warn!("Failed to discard rejected upload: {}", e);
        }
    }

    pub fn remove(&self, path: &Path) -> Result<(), StorageError> {
        remove_path(path)
    }
}
