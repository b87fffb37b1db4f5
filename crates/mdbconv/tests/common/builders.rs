//! Scriptable table reader and builders for its content.
//!
//! `FakeReader` records how often it is called, can fail discovery a given
//! number of times, can fail row reads for chosen tables, and can hold row
//! reads at a gate until the test opens it.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use mdbconv::error::AdapterError;
use mdbconv::reader::{rows_from_vec, CellValue, Column, Row, RowStream, TableDescriptor, TableReader};

/// Builder for one fake table.
pub struct TableBuilder {
    name: String,
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl TableBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, data_type: &str) -> Self {
        self.columns.push(Column::typed(name, data_type));
        self
    }

    pub fn row(mut self, values: Vec<CellValue>) -> Self {
        self.rows.push(values);
        self
    }

    /// `count` rows of `(id, "row {id}")`; expects two columns.
    pub fn numbered_rows(mut self, count: i64) -> Self {
        for id in 1..=count {
            self.rows
                .push(vec![CellValue::Integer(id), CellValue::Text(format!("row {}", id))]);
        }
        self
    }

    fn build(self) -> (TableDescriptor, Vec<Row>) {
        let table = TableDescriptor::new(self.name, self.columns).with_row_count(self.rows.len() as u64);
        (table, self.rows)
    }
}

/// Blocks readers until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    pub fn open(&self) {
        let mut open = self.open.lock().unwrap();
        *open = true;
        self.changed.notify_all();
    }

    /// Readers currently blocked at the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn pass(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            let (guard, _) = self
                .changed
                .wait_timeout(open, Duration::from_millis(50))
                .unwrap();
            open = guard;
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeReader {
    tables: Vec<(TableDescriptor, Vec<Row>)>,
    open_calls: AtomicUsize,
    read_calls: AtomicUsize,
    open_failures_left: AtomicUsize,
    failing_tables: HashSet<String>,
    gate: Option<Arc<Gate>>,
    read_delay: Option<Duration>,
}

impl FakeReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// The two-table shop database used across scenarios.
    pub fn shop() -> Self {
        Self::new()
            .with_table(
                TableBuilder::new("Customers")
                    .column("ID", "Long Integer")
                    .column("Name", "Text")
                    .numbered_rows(3),
            )
            .with_table(
                TableBuilder::new("Orders")
                    .column("ID", "Long Integer")
                    .column("Item", "Text")
                    .numbered_rows(5),
            )
    }

    pub fn with_table(mut self, table: TableBuilder) -> Self {
        self.tables.push(table.build());
        self
    }

    /// The next `times` discoveries fail as unreadable.
    pub fn failing_open(self, times: usize) -> Self {
        self.open_failures_left.store(times, Ordering::SeqCst);
        self
    }

    /// Row reads of `table` fail.
    pub fn failing_table(mut self, table: &str) -> Self {
        self.failing_tables.insert(table.to_string());
        self
    }

    /// Row reads wait until `gate` is opened.
    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }
}

impl TableReader for FakeReader {
    fn open_tables(&self, path: &Path) -> Result<Vec<TableDescriptor>, AdapterError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if !path.exists() {
            return Err(AdapterError::FileNotFound(path.to_path_buf()));
        }

        let failures = self.open_failures_left.load(Ordering::SeqCst);
        if failures > 0 {
            self.open_failures_left.store(failures - 1, Ordering::SeqCst);
            return Err(AdapterError::Unreadable {
                path: path.to_path_buf(),
                message: "not a Jet database".to_string(),
            });
        }

        Ok(self.tables.iter().map(|(t, _)| t.clone()).collect())
    }

    fn read_rows(&self, _path: &Path, table: &TableDescriptor) -> Result<RowStream, AdapterError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        if self.failing_tables.contains(&table.name) {
            return Err(AdapterError::RowRead {
                table: table.name.clone(),
                message: "corrupt data page".to_string(),
            });
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
}
