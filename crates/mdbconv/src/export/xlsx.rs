//! Minimal SpreadsheetML writer: one worksheet, inline strings, bold and
//! frozen header row.
//!
//! Rows are streamed into the worksheet part while the ZIP entry is open, so
//! only the first [`WIDTH_SAMPLE_ROWS`] rows are buffered (to size columns).

use std::fs::File;
use std::io::Write;
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{AdapterError, EncodeError};
use crate::reader::{CellValue, Row, RowStream, TableDescriptor};

use super::{io_error, written_size, ExportFormat, TableEncoder};

/// Excel's hard row limit, header included.
pub const MAX_ROWS: usize = 1_048_576;
const MAX_CELL_CHARS: usize = 32_767;
const MAX_SHEET_NAME: usize = 31;
const MAX_COLUMN_WIDTH: usize = 50;
const WIDTH_SAMPLE_ROWS: usize = 100;

const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

/// Style 0 is the default, style 1 is the bold header.
const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;

fn xml_error<E: std::fmt::Display>(e: E) -> EncodeError {
    EncodeError::Spreadsheet(e.to_string())
}

fn zip_error(e: zip::result::ZipError) -> EncodeError {
    EncodeError::Spreadsheet(e.to_string())
}

#[derive(Default)]
pub struct XlsxEncoder;

impl XlsxEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl TableEncoder for XlsxEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Xlsx
    }

    fn encode(
        &self,
        table: &TableDescriptor,
        mut rows: RowStream,
        output: &Path,
    ) -> Result<u64, EncodeError> {
        let file = File::create(output).map_err(io_error(output))?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, body) in [
            ("[Content_Types].xml", CONTENT_TYPES),
            ("_rels/.rels", ROOT_RELS),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/styles.xml", STYLES),
        ] {
            zip.start_file(name, options).map_err(zip_error)?;
            zip.write_all(body.as_bytes()).map_err(io_error(output))?;
        }

        zip.start_file("xl/workbook.xml", options).map_err(zip_error)?;
        write_workbook(&mut zip, &sheet_name(&table.name))?;

        let mut sample: Vec<Row> = Vec::new();
        for row in rows.by_ref().take(WIDTH_SAMPLE_ROWS) {
            sample.push(row?);
        }
        let widths = column_widths(table, &sample);

        zip.start_file("xl/worksheets/sheet1.xml", options).map_err(zip_error)?;
        write_sheet(&mut zip, table, &widths, sample.into_iter().map(Ok).chain(rows))?;

        let mut file = zip.finish().map_err(zip_error)?;
        file.flush().map_err(io_error(output))?;
        drop(file);

        written_size(output)
    }
}

fn write_workbook<W: Write>(out: W, sheet: &str) -> Result<(), EncodeError> {
    let mut writer = Writer::new(out);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Start(
            BytesStart::new("workbook").with_attributes([("xmlns", NS_MAIN), ("xmlns:r", NS_REL)]),
        ))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("sheets")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Empty(BytesStart::new("sheet").with_attributes([
            ("name", sheet),
            ("sheetId", "1"),
            ("r:id", "rId1"),
        ])))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("sheets")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("workbook")))
        .map_err(xml_error)?;
    Ok(())
}

fn write_sheet<W, I>(
    out: W,
    table: &TableDescriptor,
    widths: &[usize],
    rows: I,
) -> Result<(), EncodeError>
where
    W: Write,
    I: Iterator<Item = Result<Row, AdapterError>>,
{
    let mut writer = Writer::new(out);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Start(
            BytesStart::new("worksheet").with_attributes([("xmlns", NS_MAIN)]),
        ))
        .map_err(xml_error)?;

    // Frozen header row.
    writer
        .write_event(Event::Start(BytesStart::new("sheetViews")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Start(
            BytesStart::new("sheetView").with_attributes([("workbookViewId", "0")]),
        ))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Empty(BytesStart::new("pane").with_attributes([
            ("ySplit", "1"),
            ("topLeftCell", "A2"),
            ("activePane", "bottomLeft"),
            ("state", "frozen"),
        ])))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("sheetView")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("sheetViews")))
        .map_err(xml_error)?;

    if !widths.is_empty() {
        writer
            .write_event(Event::Start(BytesStart::new("cols")))
            .map_err(xml_error)?;
        for (i, width) in widths.iter().enumerate() {
            let index = (i + 1).to_string();
            let width = width.to_string();
            writer
                .write_event(Event::Empty(BytesStart::new("col").with_attributes([
                    ("min", index.as_str()),
                    ("max", index.as_str()),
                    ("width", width.as_str()),
                    ("customWidth", "1"),
                ])))
                .map_err(xml_error)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("cols")))
            .map_err(xml_error)?;
    }

    writer
        .write_event(Event::Start(BytesStart::new("sheetData")))
        .map_err(xml_error)?;

    let header: Vec<CellValue> = table
        .columns
        .iter()
        .map(|c| CellValue::Text(c.name.clone()))
        .collect();
    write_row(&mut writer, 1, &header, true)?;

    let mut row_number = 1;
    for row in rows {
        let row = row?;
        row_number += 1;
        if row_number > MAX_ROWS {
            return Err(EncodeError::Spreadsheet(format!(
                "table '{}' exceeds the worksheet limit of {} rows",
                table.name, MAX_ROWS
            )));
        }
        write_row(&mut writer, row_number, &row, false)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("sheetData")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("worksheet")))
        .map_err(xml_error)?;
    Ok(())
}

fn write_row<W: Write>(
    writer: &mut Writer<W>,
    row_number: usize,
    cells: &[CellValue],
    header: bool,
) -> Result<(), EncodeError> {
    let r = row_number.to_string();
    writer
        .write_event(Event::Start(
            BytesStart::new("row").with_attributes([("r", r.as_str())]),
        ))
        .map_err(xml_error)?;

    for (i, cell) in cells.iter().enumerate() {
        if cell.is_null() {
            continue;
        }
        let reference = format!("{}{}", column_letter(i), row_number);
        let mut start = BytesStart::new("c");
        start.push_attribute(("r", reference.as_str()));
        if header {
            start.push_attribute(("s", "1"));
        }

        let value = match cell {
            CellValue::Integer(n) => Some(n.to_string()),
            CellValue::Float(f) if f.is_finite() => Some(f.to_string()),
            CellValue::Bool(b) => {
                start.push_attribute(("t", "b"));
                Some(if *b { "1" } else { "0" }.to_string())
            }
            _ => None,
        };

        match value {
            Some(v) => {
                writer.write_event(Event::Start(start)).map_err(xml_error)?;
                writer
                    .write_event(Event::Start(BytesStart::new("v")))
                    .map_err(xml_error)?;
                writer
                    .write_event(Event::Text(BytesText::new(&v)))
                    .map_err(xml_error)?;
                writer
                    .write_event(Event::End(BytesEnd::new("v")))
                    .map_err(xml_error)?;
            }
            None => {
                start.push_attribute(("t", "inlineStr"));
                writer.write_event(Event::Start(start)).map_err(xml_error)?;
                writer
                    .write_event(Event::Start(BytesStart::new("is")))
                    .map_err(xml_error)?;
                let text = cell_text(&cell.display());
                let mut t = BytesStart::new("t");
                if text.trim() != text {
                    t.push_attribute(("xml:space", "preserve"));
                }
                writer.write_event(Event::Start(t)).map_err(xml_error)?;
                writer
                    .write_event(Event::Text(BytesText::new(&text)))
                    .map_err(xml_error)?;
                writer
                    .write_event(Event::End(BytesEnd::new("t")))
                    .map_err(xml_error)?;
                writer
                    .write_event(Event::End(BytesEnd::new("is")))
                    .map_err(xml_error)?;
            }
        }
        writer
            .write_event(Event::End(BytesEnd::new("c")))
            .map_err(xml_error)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("row")))
        .map_err(xml_error)?;
    Ok(())
}

/// Strips characters XML 1.0 cannot carry and clamps to Excel's cell limit.
fn cell_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .take(MAX_CELL_CHARS)
        .collect()
}

/// Zero-based column index to `A`, `B`, ..., `Z`, `AA`, ...
fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Excel forbids `[]:*?/\` in sheet names and caps them at 31 characters.
fn sheet_name(table: &str) -> String {
    let cleaned: String = table
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_SHEET_NAME)
        .collect();
    let cleaned = cleaned.trim_matches('\'').trim().to_string();
    if cleaned.is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned
    }
}

fn column_widths(table: &TableDescriptor, sample: &[Row]) -> Vec<usize> {
    table
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let longest = sample
                .iter()
                .filter_map(|row| row.get(i))
                .map(|cell| cell.display().chars().count())
                .chain(std::iter::once(column.name.chars().count()))
                .max()
                .unwrap_or(0);
            (longest + 2).min(MAX_COLUMN_WIDTH)
        })
        .collect()
}
