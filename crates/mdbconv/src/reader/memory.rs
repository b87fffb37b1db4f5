use std::path::Path;

use crate::error::AdapterError;

use super::{rows_from_vec, ReaderDiagnostics, Row, RowStream, TableDescriptor, TableReader};

/// Reader serving fixed tables regardless of file content. Useful for
/// previews and tests; the file at `path` only has to exist.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    tables: Vec<(TableDescriptor, Vec<Row>)>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: TableDescriptor, rows: Vec<Row>) -> Self {
        let table = table.with_row_count(rows.len() as u64);
        self.tables.push((table, rows));
        self
    }
}

impl TableReader for MemoryReader {
    fn open_tables(&self, path: &Path) -> Result<Vec<TableDescriptor>, AdapterError> {
        if !path.exists() {
            return Err(AdapterError::FileNotFound(path.to_path_buf()));
        }
        Ok(self.tables.iter().map(|(t, _)| t.clone()).collect())
    }

    fn read_rows(&self, path: &Path, table: &TableDescriptor) -> Result<RowStream, AdapterError> {
        if !path.exists() {
            return Err(AdapterError::FileNotFound(path.to_path_buf()));
        }
        self.tables
            .iter()
            .find(|(t, _)| t.name == table.name)
            .map(|(_, rows)| rows_from_vec(rows.clone()))
            .ok_or_else(|| AdapterError::RowRead {
                table: table.name.clone(),
                message: "no such table".to_string(),
            })
    }

    fn diagnose(&self) -> ReaderDiagnostics {
        ReaderDiagnostics::in_process("memory")
    }
}
