//! Helpers for sanitizing names before they reach the filesystem or a
//! tracing span.
//!
//! Span fields only ever see file names, never the directories uploads and
//! exports live in.

use std::collections::HashSet;
use std::path::Path;

const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Replaces every occurrence of `path` in driver output with its file name.
pub fn redact_path_in(text: &str, path: &Path) -> String {
    let full = path.to_string_lossy();
    if full.is_empty() {
        return text.to_string();
    }
    text.replace(full.as_ref(), &redact_path(path))
}

/// Makes a user-supplied name safe to use as a single path component.
///
/// Reserved characters and control characters become `_`, leading and
/// trailing dots and spaces are stripped, and an empty result becomes
/// `fallback`.
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if RESERVED.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Assigns a distinct file stem to every table, in the order given.
///
/// Tables whose sanitized names collide get `_2`, `_3`, ... appended, so
/// `["a/b", "a:b"]` becomes `["a_b", "a_b_2"]`.
pub fn unique_file_stems<S: AsRef<str>>(tables: &[S]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut stems = Vec::with_capacity(tables.len());

    for table in tables {
        let base = sanitize_file_name(table.as_ref(), "table");
        let mut candidate = base.clone();
        let mut counter = 1;
        // Case-insensitive filesystems would merge `Orders` and `ORDERS`.
        while taken.contains(&candidate.to_lowercase()) {
            counter += 1;
            candidate = format!("{}_{}", base, counter);
        }
        taken.insert(candidate.to_lowercase());
        stems.push(candidate);
    }

    stems
}

/// Download name offered for a job's archive: `{stem}_export.zip`.
pub fn archive_download_name(original_filename: &str) -> String {
    let stem = Path::new(original_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    format!("{}_export.zip", sanitize_file_name(stem, "database"))
}
