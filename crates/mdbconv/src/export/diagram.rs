use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use crate::error::EncodeError;
use crate::reader::{RowStream, TableDescriptor};

use super::{create_output, io_error, written_size, ExportFormat, TableEncoder};

/// Mermaid `erDiagram` entity for one table.
///
/// The row count goes into a `%%` comment. A count reported by the driver
/// is used as is; rows are only read when there is none.
#[derive(Default)]
pub struct DiagramEncoder;

impl DiagramEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl TableEncoder for DiagramEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Diagram
    }

    fn encode(
        &self,
        table: &TableDescriptor,
        rows: RowStream,
        output: &Path,
    ) -> Result<u64, EncodeError> {
        let row_count = match table.row_count {
            Some(count) => count,
            None => count_rows(rows)?,
        };

        let text = render_entity(table, row_count);
        let mut out = create_output(output)?;
        out.write_all(text.as_bytes()).map_err(io_error(output))?;
        out.flush().map_err(io_error(output))?;
        drop(out);

        written_size(output)
    }
}

fn count_rows(rows: RowStream) -> Result<u64, EncodeError> {
    let mut count: u64 = 0;
    for row in rows {
        row?;
        count += 1;
    }
    Ok(count)
}

fn render_entity(table: &TableDescriptor, row_count: u64) -> String {
    let mut text = String::from("erDiagram\n");
    let _ = writeln!(text, "    %% table: {}", table.name.replace('\n', " "));
    let _ = writeln!(text, "    %% rows: {}", row_count);
    let _ = writeln!(text, "    {} {{", identifier(&table.name));
    for column in &table.columns {
        let data_type = column
            .data_type
            .as_deref()
            .map(identifier)
            .unwrap_or_else(|| "string".to_string());
        let _ = writeln!(
            text,
            "        {} {} \"{}\"",
            data_type,
            identifier(&column.name),
            column.name.replace('"', "'")
        );
    }
    text.push_str("    }\n");
    text
}

/// Mermaid identifiers allow letters, digits, `_` and `-` only.
fn identifier(raw: &str) -> String {
    let mut id: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    while id.contains("__") {
        id = id.replace("__", "_");
    }
    let id = id.trim_matches('_').to_string();
    match id.chars().next() {
        None => "unnamed".to_string(),
        Some(c) if c.is_ascii_digit() => format!("_{}", id),
        Some(_) => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::reader::{rows_from_vec, CellValue, Column};

    #[test]
    fn test_identifier() {
        assert_eq!(identifier("Order Details"), "Order_Details");
        assert_eq!(identifier("Text (50)"), "Text_50");
        assert_eq!(identifier("2019 Sales"), "_2019_Sales");
        assert_eq!(identifier("()"), "unnamed");
    }

    #[test]
    fn test_renders_entity_block() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("Order Details.mmd");
        let table = TableDescriptor::new(
            "Order Details",
            vec![
                Column::typed("OrderID", "Long Integer"),
                Column::new("Unit \"Price\""),
            ],
        );
        let rows = rows_from_vec(vec![vec![CellValue::Integer(1), CellValue::Float(9.5)]; 3]);

        DiagramEncoder::new().encode(&table, rows, &out).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("erDiagram\n"));
        assert!(text.contains("%% rows: 3"));
        assert!(text.contains("    Order_Details {\n"));
        assert!(text.contains("        Long_Integer OrderID \"OrderID\"\n"));
        assert!(text.contains("        string Unit_Price \"Unit 'Price'\"\n"));
        assert!(text.ends_with("    }\n"));
    }

    #[test]
    fn test_reported_row_count_skips_reading() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("Orders.mmd");
        let table = TableDescriptor::new("Orders", vec![Column::new("ID")]).with_row_count(7);
        let rows: RowStream = Box::new(std::iter::once(Err(AdapterError::RowRead {
            table: "Orders".to_string(),
            message: "should not be read".to_string(),
        })));

        DiagramEncoder::new().encode(&table, rows, &out).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("%% rows: 7"));
    }
}
