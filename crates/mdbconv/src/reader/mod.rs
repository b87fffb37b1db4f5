//! Table reader seam: everything that knows how to open an Access file.

pub mod mdbtools;
pub mod memory;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

pub use mdbtools::MdbToolsReader;
pub use memory::MemoryReader;

/// Access keeps its catalog in tables with this prefix.
pub const SYSTEM_TABLE_PREFIX: &str = "MSys";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    /// Type name as reported by the driver, e.g. `Long Integer` or `Text (50)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
        }
    }

    pub fn typed(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: Some(data_type.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub name: String,
    /// Driver-reported count; only the diagram reads it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    pub columns: Vec<Column>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            row_count: None,
            columns,
        }
    }

    pub fn with_row_count(mut self, rows: u64) -> Self {
        self.row_count = Some(rows);
        self
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn is_system_table(&self) -> bool {
        self.name.starts_with(SYSTEM_TABLE_PREFIX)
    }
}

/// A single cell, typed as far as the driver tells us.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Integer(i),
                None => n.as_f64().map(CellValue::Float).unwrap_or(CellValue::Null),
            },
            serde_json::Value::String(s) => CellValue::Text(s),
            other => CellValue::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Text rendering used by the tabular encoders. Null renders empty.
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Float(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

/// One row, aligned with `TableDescriptor::columns`.
pub type Row = Vec<CellValue>;

/// Lazy, single-pass row iterator. Dropping it releases the underlying reader.
pub type RowStream = Box<dyn Iterator<Item = Result<Row, AdapterError>> + Send>;

/// Wraps already materialized rows as a stream.
pub fn rows_from_vec(rows: Vec<Row>) -> RowStream {
    Box::new(rows.into_iter().map(Ok))
}

/// Whether one external program the reader depends on can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub available: bool,
}

/// Availability report of a table reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderDiagnostics {
    pub driver: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ReaderDiagnostics {
    /// Report for a reader without external dependencies.
    pub fn in_process(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            available: true,
            version: None,
            tools: Vec::new(),
            message: None,
        }
    }
}

pub trait TableReader: Send + Sync {
    /// Lists the user tables in the database at `path`, in the driver's order.
    fn open_tables(&self, path: &Path) -> Result<Vec<TableDescriptor>, AdapterError>;

    /// Opens a fresh row stream for `table`. Each call starts from the first row.
    fn read_rows(&self, path: &Path, table: &TableDescriptor) -> Result<RowStream, AdapterError>;

    /// Checks that the reader can run at all, without opening a database.
    fn diagnose(&self) -> ReaderDiagnostics {
        ReaderDiagnostics::in_process("in-process")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_from_json() {
        assert_eq!(CellValue::from_json(json!(null)), CellValue::Null);
        assert_eq!(CellValue::from_json(json!(true)), CellValue::Bool(true));
        assert_eq!(CellValue::from_json(json!(42)), CellValue::Integer(42));
        assert_eq!(CellValue::from_json(json!(1.5)), CellValue::Float(1.5));
        assert_eq!(
            CellValue::from_json(json!("Zürich")),
            CellValue::Text("Zürich".to_string())
        );
        assert_eq!(
            CellValue::from_json(json!([1, 2])),
            CellValue::Text("[1,2]".to_string())
        );
    }

    #[test]
    fn test_cell_serializes_untagged() {
        let row: Row = vec![
            CellValue::Null,
            CellValue::Integer(7),
            CellValue::Text("x".into()),
        ];
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"[null,7,"x"]"#);
    }

    #[test]
    fn test_cell_display() {
        assert_eq!(CellValue::Null.display(), "");
        assert_eq!(CellValue::Bool(false).display(), "false");
        assert_eq!(CellValue::Float(2.25).display(), "2.25");
    }

    #[test]
    fn test_system_table_detection() {
        assert!(TableDescriptor::new("MSysObjects", vec![]).is_system_table());
        assert!(!TableDescriptor::new("Customers", vec![]).is_system_table());
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let table = TableDescriptor::new("Orders", vec![Column::typed("ID", "Long Integer")])
            .with_row_count(12);
        let value = serde_json::to_value(&table).unwrap();
        assert_eq!(value["rowCount"], 12);
        assert_eq!(value["columns"][0]["dataType"], "Long Integer");
    }
}
