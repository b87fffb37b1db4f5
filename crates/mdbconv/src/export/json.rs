use std::io::Write;
use std::path::Path;

use crate::error::EncodeError;
use crate::reader::{RowStream, TableDescriptor};

use super::{create_output, io_error, written_size, ExportFormat, TableEncoder};

/// Array of records, one object per row, keys in column order, indented by 2.
/// Rows are written as they arrive so memory stays flat for large tables.
#[derive(Default)]
pub struct JsonEncoder;

impl JsonEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl TableEncoder for JsonEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn encode(
        &self,
        table: &TableDescriptor,
        rows: RowStream,
        output: &Path,
    ) -> Result<u64, EncodeError> {
        let mut out = create_output(output)?;
        let keys = table
            .columns
            .iter()
            .map(|c| serde_json::to_string(&c.name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut first = true;
        out.write_all(b"[").map_err(io_error(output))?;
        for row in rows {
            let row = row?;
            let mut record = String::from(if first { "\n  {" } else { ",\n  {" });
            first = false;

            for (i, (key, cell)) in keys.iter().zip(row.iter()).enumerate() {
                if i > 0 {
                    record.push(',');
                }
                record.push_str("\n    ");
                record.push_str(key);
                record.push_str(": ");
                record.push_str(&serde_json::to_string(cell)?);
            }
            record.push_str(if keys.is_empty() { "}" } else { "\n  }" });
            out.write_all(record.as_bytes()).map_err(io_error(output))?;
        }
        let closing: &[u8] = if first { b"]\n" } else { b"\n]\n" };
        out.write_all(closing).map_err(io_error(output))?;
        out.flush().map_err(io_error(output))?;
        drop(out);

        written_size(output)
    }
}
