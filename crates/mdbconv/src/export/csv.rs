use std::io::Write;
use std::path::Path;

use ::csv::{QuoteStyle, Terminator, WriterBuilder};

use crate::error::EncodeError;
use crate::reader::{RowStream, TableDescriptor};

use super::{create_output, io_error, written_size, ExportFormat, TableEncoder};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Spreadsheet-friendly CSV: UTF-8 with BOM, every field quoted, `\n` rows.
pub struct CsvEncoder {
    delimiter: u8,
}

impl CsvEncoder {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl Default for CsvEncoder {
    /// Semicolon, so Excel in comma-decimal locales opens files unchanged.
    fn default() -> Self {
        Self::new(b';')
    }
}

impl TableEncoder for CsvEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn encode(
        &self,
        table: &TableDescriptor,
        rows: RowStream,
        output: &Path,
    ) -> Result<u64, EncodeError> {
        let mut file = create_output(output)?;
        file.write_all(UTF8_BOM).map_err(io_error(output))?;

        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .quote_style(QuoteStyle::Always)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(file);

        writer.write_record(table.column_names())?;
        for row in rows {
            let row = row?;
            writer.write_record(row.iter().map(|cell| cell.display()))?;
        }

        let mut file = writer
            .into_inner()
            .map_err(|e| io_error(output)(e.into_error()))?;
        file.flush().map_err(io_error(output))?;
        drop(file);

        written_size(output)
    }
}
