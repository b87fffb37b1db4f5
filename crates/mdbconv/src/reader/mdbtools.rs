//! Table reader backed by the `mdbtools` command-line driver.
//!
//! Table names come from `mdb-tables`, column layout from `mdb-schema`
//! (falling back to the `mdb-export` header line), row counts from
//! `mdb-count`, and typed rows from `mdb-json`, one JSON object per line.

use std::io::{self, BufRead, BufReader, Lines, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Output, Stdio};
use std::thread::{self, JoinHandle};

use crate::error::AdapterError;
use crate::sanitize::redact_path_in;

use super::{
    CellValue, Column, ReaderDiagnostics, Row, RowStream, TableDescriptor, TableReader, ToolStatus,
};

/// Bytes of driver stderr kept for error messages; the rest is discarded.
const STDERR_LIMIT: u64 = 8 * 1024;

/// Tools discovery and export cannot work without.
const REQUIRED_TOOLS: [&str; 3] = ["mdb-tables", "mdb-schema", "mdb-json"];
/// Tools with a fallback: row counts are optional, headers come from the schema.
const OPTIONAL_TOOLS: [&str; 3] = ["mdb-count", "mdb-export", "mdb-ver"];

/// Formats a tool failure with stderr, falling back to stdout and exit code.
fn format_tool_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, _) => stderr,
    }
}

#[derive(Debug, Clone, Default)]
pub struct MdbToolsReader {
    /// Directory holding the binaries; `None` resolves them via `PATH`.
    bin_dir: Option<PathBuf>,
}

impl MdbToolsReader {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self { bin_dir }
    }

    fn command(&self, tool: &str) -> Command {
        match &self.bin_dir {
            Some(dir) => Command::new(dir.join(tool)),
            None => Command::new(tool),
        }
    }

    /// Resolves `tool` in the configured directory or on `PATH`.
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        let file_name = format!("{}{}", tool, std::env::consts::EXE_SUFFIX);
        match &self.bin_dir {
            Some(dir) => Some(dir.join(&file_name)).filter(|p| p.is_file()),
            None => std::env::var_os("PATH").and_then(|paths| {
                std::env::split_paths(&paths)
                    .map(|dir| dir.join(&file_name))
                    .find(|p| p.is_file())
            }),
        }
    }

    /// `mdb-ver -M` prints the mdbtools release.
    fn version(&self) -> Option<String> {
        let output = self
            .command("mdb-ver")
            .arg("-M")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!version.is_empty()).then_some(version)
    }

    fn spawn_error(tool: &str, source: std::io::Error) -> AdapterError {
        AdapterError::DriverUnavailable {
            tool: tool.to_string(),
            source,
        }
    }

    /// Runs a tool to completion and returns its stdout.
    fn run(&self, tool: &str, path: &Path, args: &[&str]) -> Result<String, AdapterError> {
        let output = self
            .command(tool)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Self::spawn_error(tool, e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(AdapterError::Unreadable {
                path: path.to_path_buf(),
                message: redact_path_in(&format_tool_error(&output), path),
            })
        }
    }

    fn table_names(&self, path: &Path) -> Result<Vec<String>, AdapterError> {
        let path_arg = path.to_string_lossy();
        let stdout = self.run("mdb-tables", path, &["-1", &path_arg])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn columns(&self, path: &Path, table: &str) -> Result<Vec<Column>, AdapterError> {
        let path_arg = path.to_string_lossy();
        let ddl = self.run("mdb-schema", path, &["-T", table, &path_arg])?;
        let columns = parse_access_schema(&ddl);
        if !columns.is_empty() {
            return Ok(columns);
        }

        log::debug!("mdb-schema gave no columns for '{}', reading export header", table);
        self.header_columns(path, table)
    }

    /// Reads only the header line of `mdb-export`, then stops the process.
    fn header_columns(&self, path: &Path, table: &str) -> Result<Vec<Column>, AdapterError> {
        let mut child = self
            .command("mdb-export")
            .arg(path)
            .arg(table)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Self::spawn_error("mdb-export", e))?;

        let mut header = String::new();
        let read = match child.stdout.take() {
            Some(stdout) => BufReader::new(stdout).read_line(&mut header),
            None => Ok(0),
        };
        let _ = child.kill();
        let _ = child.wait();

        match read {
            Ok(n) if n > 0 => Ok(parse_header_line(header.trim_end())),
            _ => Err(AdapterError::RowRead {
                table: table.to_string(),
                message: "export produced no header".to_string(),
            }),
        }
    }

    fn row_count(&self, path: &Path, table: &str) -> Option<u64> {
        let path_arg = path.to_string_lossy();
        match self.run("mdb-count", path, &[&path_arg, table]) {
            Ok(stdout) => stdout.trim().parse().ok(),
            Err(e) => {
                log::debug!("mdb-count failed for '{}': {}", table, e);
                None
            }
        }
    }
}

impl TableReader for MdbToolsReader {
    fn open_tables(&self, path: &Path) -> Result<Vec<TableDescriptor>, AdapterError> {
        if !path.is_file() {
            return Err(AdapterError::FileNotFound(path.to_path_buf()));
        }

        let mut tables = Vec::new();
        for name in self.table_names(path)? {
            let columns = self.columns(path, &name)?;
            let mut table = TableDescriptor::new(name.clone(), columns);
            table.row_count = self.row_count(path, &name);
            tables.push(table);
        }

        Ok(tables)
    }

    fn diagnose(&self) -> ReaderDiagnostics {
        let tools: Vec<ToolStatus> = REQUIRED_TOOLS
            .iter()
            .chain(OPTIONAL_TOOLS.iter())
            .map(|name| {
                let path = self.locate(name);
                ToolStatus {
                    name: name.to_string(),
                    available: path.is_some(),
                    path: path.map(|p| p.display().to_string()),
                }
            })
            .collect();

        let missing: Vec<&str> = REQUIRED_TOOLS
            .iter()
            .copied()
            .filter(|name| !tools.iter().any(|t| t.name == *name && t.available))
            .collect();

        ReaderDiagnostics {
            driver: "mdbtools".to_string(),
            available: missing.is_empty(),
            version: self.version(),
            tools,
            message: (!missing.is_empty())
                .then(|| format!("Missing required tools: {}", missing.join(", "))),
        }
    }

    fn read_rows(&self, path: &Path, table: &TableDescriptor) -> Result<RowStream, AdapterError> {
        if !path.is_file() {
            return Err(AdapterError::FileNotFound(path.to_path_buf()));
        }

        let mut child = self
            .command("mdb-json")
            .arg(path)
            .arg(&table.name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_error("mdb-json", e))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AdapterError::RowRead {
                table: table.name.clone(),
                message: "driver pipes unavailable".to_string(),
            });
        };

        // stderr must be read concurrently, or a chatty driver blocks
        // writing it while we wait on stdout.
        let stderr = match drain_stderr(stderr) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AdapterError::RowRead {
                    table: table.name.clone(),
                    message: format!("cannot read driver stderr: {}", e),
                });
            }
        };

        Ok(Box::new(JsonRows {
            table: table.name.clone(),
            source: path.to_path_buf(),
            columns: table.columns.iter().map(|c| c.name.clone()).collect(),
            lines: BufReader::new(stdout).lines(),
            child: Some(child),
            stderr: Some(stderr),
        }))
    }
}

/// Reads `stderr` to the end on its own thread, keeping the first
/// [`STDERR_LIMIT`] bytes.
fn drain_stderr(stderr: ChildStderr) -> io::Result<JoinHandle<String>> {
    thread::Builder::new()
        .name("mdb-json-stderr".to_string())
        .spawn(move || {
            let mut stderr = stderr;
            let mut kept = Vec::new();
            let _ = stderr.by_ref().take(STDERR_LIMIT).read_to_end(&mut kept);
            let _ = io::copy(&mut stderr, &mut io::sink());
            String::from_utf8_lossy(&kept).into_owned()
        })
}

/// Streams `mdb-json` output, aligning each object to the column order.
struct JsonRows {
    table: String,
    source: PathBuf,
    columns: Vec<String>,
    lines: Lines<BufReader<ChildStdout>>,
    child: Option<Child>,
    stderr: Option<JoinHandle<String>>,
}

impl JsonRows {
    fn row_error(&self, message: impl Into<String>) -> AdapterError {
        AdapterError::RowRead {
            table: self.table.clone(),
            message: message.into(),
        }
    }

    /// Reaps the child once stdout is exhausted. A non-zero exit is an error.
    fn finish(&mut self) -> Option<Result<Row, AdapterError>> {
        let mut child = self.child.take()?;
        let status = child.wait();
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        match status {
            Ok(status) if status.success() => None,
            Ok(status) => {
                let message = match stderr.trim() {
                    "" => format!("driver exited with {}", status),
                    text => redact_path_in(text, &self.source),
                };
                Some(Err(self.row_error(message)))
            }
            Err(e) => Some(Err(self.row_error(e.to_string()))),
        }
    }

    /// Kills the driver. The stderr thread ends once the pipe closes.
    fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.stderr = None;
    }
}

impl Iterator for JsonRows {
    type Item = Result<Row, AdapterError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.child.as_ref()?;

        loop {
            match self.lines.next() {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => {
                    let row = parse_json_row(&line, &self.columns);
                    return Some(row.map_err(|e| self.row_error(e)));
                }
                Some(Err(e)) => {
                    let err = self.row_error(e.to_string());
                    self.terminate();
                    return Some(Err(err));
                }
                None => return self.finish(),
            }
        }
    }
}

impl Drop for JsonRows {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn parse_json_row(line: &str, columns: &[String]) -> Result<Row, String> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let mut object = match value {
        serde_json::Value::Object(map) => map,
        _ => return Err("expected a JSON object per row".to_string()),
    };

    Ok(columns
        .iter()
        .map(|name| {
            object
                .remove(name)
                .map(CellValue::from_json)
                .unwrap_or(CellValue::Null)
        })
        .collect())
}

fn parse_header_line(line: &str) -> Vec<Column> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(Ok(record)) => record.iter().map(Column::new).collect(),
        _ => Vec::new(),
    }
}

/// Extracts `[name] type` pairs from the Access-dialect DDL of one table.
fn parse_access_schema(ddl: &str) -> Vec<Column> {
    let mut columns = Vec::new();
    let mut in_table = false;

    for line in ddl.lines() {
        let line = line.trim();
        if line.starts_with("CREATE TABLE") {
            in_table = true;
            continue;
        }
        if !in_table {
            continue;
        }
        if line.starts_with(");") || line == ")" {
            break;
        }
        let Some(rest) = line.strip_prefix('[') else {
            continue;
        };
        let Some(end) = rest.find(']') else {
            continue;
        };
        let name = &rest[..end];
        let data_type = rest[end + 1..].trim().trim_end_matches(',').trim();
        columns.push(if data_type.is_empty() {
            Column::new(name)
        } else {
            Column::typed(name, data_type)
        });
    }

    columns
}
