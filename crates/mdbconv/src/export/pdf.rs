//! Paginated PDF table listing built directly with lopdf.
//!
//! A4 portrait, Helvetica, 35 rows per page with the header repeated on
//! every page, and a summary footer after the last row.

use std::io::Write;
use std::path::Path;

use chrono::Utc;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use crate::error::EncodeError;
use crate::reader::{RowStream, TableDescriptor};

use super::{create_output, io_error, written_size, ExportFormat, TableEncoder};

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 28.0;
const ROWS_PER_PAGE: usize = 35;
const HEADER_HEIGHT: f32 = 18.0;
const ROW_HEIGHT: f32 = 15.0;
/// 15mm and 40mm.
const MIN_COLUMN_WIDTH: f32 = 42.5;
const MAX_COLUMN_WIDTH: f32 = 113.4;
const MAX_HEADER_CHARS: usize = 20;
const MAX_CELL_CHARS: usize = 25;

#[derive(Default)]
pub struct PdfEncoder;

impl PdfEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl TableEncoder for PdfEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Pdf
    }

    fn encode(
        &self,
        table: &TableDescriptor,
        rows: RowStream,
        output: &Path,
    ) -> Result<u64, EncodeError> {
        let layout = Layout::for_table(table);
        let mut builder = PdfBuilder::new();

        let mut page = layout.begin_page(table, true);
        let mut rows_on_page = 0;
        let mut total_rows: u64 = 0;

        for row in rows {
            let row = row?;
            if rows_on_page == ROWS_PER_PAGE {
                builder.add_page(page);
                page = layout.begin_page(table, false);
                rows_on_page = 0;
            }
            let cells: Vec<String> = row
                .iter()
                .map(|c| truncate(&c.display(), MAX_CELL_CHARS))
                .collect();
            layout.draw_row(&mut page, rows_on_page, &cells, false);
            rows_on_page += 1;
            total_rows += 1;
        }

        layout.draw_footer(&mut page, rows_on_page, total_rows, table.columns.len());
        builder.add_page(page);

        let mut out = create_output(output)?;
        builder.save(&mut out)?;
        out.flush().map_err(io_error(output))?;
        drop(out);

        written_size(output)
    }
}

/// Column geometry shared by every page of one table.
struct Layout {
    widths: Vec<f32>,
    hidden_columns: usize,
    headers: Vec<String>,
}

impl Layout {
    fn for_table(table: &TableDescriptor) -> Self {
        let available = PAGE_WIDTH - 2.0 * MARGIN;
        let count = table.columns.len().max(1);
        let width = (available / count as f32).clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH);
        let visible = ((available / width).floor() as usize).min(table.columns.len());

        Self {
            widths: vec![width; visible],
            hidden_columns: table.columns.len() - visible,
            headers: table
                .columns
                .iter()
                .take(visible)
                .map(|c| truncate(&c.name, MAX_HEADER_CHARS))
                .collect(),
        }
    }

    fn table_top(first_page: bool) -> f32 {
        if first_page {
            PAGE_HEIGHT - MARGIN - 46.0
        } else {
            PAGE_HEIGHT - MARGIN
        }
    }

    fn begin_page(&self, table: &TableDescriptor, first_page: bool) -> Page {
        let mut page = Page {
            content: String::new(),
            top: Self::table_top(first_page),
        };

        if first_page {
            page.text(
                "F2",
                16.0,
                MARGIN,
                PAGE_HEIGHT - MARGIN - 16.0,
                &format!("Table: {}", table.name),
            );
            if self.hidden_columns > 0 {
                page.text(
                    "F1",
                    8.0,
                    MARGIN,
                    PAGE_HEIGHT - MARGIN - 32.0,
                    &format!(
                        "Showing {} of {} columns",
                        self.widths.len(),
                        self.widths.len() + self.hidden_columns
                    ),
                );
            }
        }

        self.draw_row(&mut page, 0, &self.headers, true);
        page
    }

    /// Draws a header (`index` ignored) or the `index`-th body row of a page.
    fn draw_row(&self, page: &mut Page, index: usize, cells: &[String], header: bool) {
        let (y, height, font, size) = if header {
            (page.top - HEADER_HEIGHT, HEADER_HEIGHT, "F2", 8.0)
        } else {
            (
                page.top - HEADER_HEIGHT - (index as f32 + 1.0) * ROW_HEIGHT,
                ROW_HEIGHT,
                "F1",
                7.0,
            )
        };

        let mut x = MARGIN;
        for (i, width) in self.widths.iter().enumerate() {
            if header {
                page.fill_rect(x, y, *width, height, 0.9);
            }
            page.stroke_rect(x, y, *width, height);
            if let Some(text) = cells.get(i) {
                page.text(font, size, x + 2.0, y + (height - size) / 2.0 + 1.0, text);
            }
            x += width;
        }
    }

    fn draw_footer(&self, page: &mut Page, rows_on_page: usize, total_rows: u64, columns: usize) {
        let mut y = page.top - HEADER_HEIGHT - rows_on_page as f32 * ROW_HEIGHT - 24.0;
        let lines = [
            format!("Generated on: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")),
            format!("Total rows: {}", total_rows),
            format!("Total columns: {}", columns),
        ];
        for line in lines {
            page.text("F1", 8.0, MARGIN, y, &line);
            y -= 12.0;
        }
    }
}

struct Page {
    content: String,
    top: f32,
}

impl Page {
    fn text(&mut self, font: &str, size: f32, x: f32, y: f32, text: &str) {
        self.content.push_str(&format!(
            "BT /{} {} Tf {:.2} {:.2} Td ({}) Tj ET\n",
            font,
            size,
            x,
            y,
            escape_pdf_string(text)
        ));
    }

    fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        self.content
            .push_str(&format!("0.5 w {:.2} {:.2} {:.2} {:.2} re S\n", x, y, w, h));
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, gray: f32) {
        self.content.push_str(&format!(
            "{} g {:.2} {:.2} {:.2} {:.2} re f 0 g\n",
            gray, x, y, w, h
        ));
    }
}

/// Accumulates pages into a single-section document.
struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    resources_id: ObjectId,
    page_ids: Vec<ObjectId>,
}

impl PdfBuilder {
    fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let regular = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular,
                "F2" => bold,
            },
        });

        Self {
            doc,
            pages_id,
            resources_id,
            page_ids: Vec::new(),
        }
    }

    fn add_page(&mut self, page: Page) {
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, page.content.into_bytes()));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            "Resources" => self.resources_id,
            "Contents" => content_id,
        });
        self.page_ids.push(page_id);
    }

    fn save<W: Write>(mut self, out: &mut W) -> Result<(), EncodeError> {
        let kids: Vec<Object> = self.page_ids.iter().map(|id| (*id).into()).collect();
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.page_ids.len() as i64,
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();

        self.doc
            .save_to(out)
            .map_err(|e| EncodeError::Pdf(e.to_string()))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut cut: String = text.chars().take(keep).collect();
    cut.push_str("...");
    cut
}

/// Escapes text for a literal string in the WinAnsi-encoded base fonts.
/// Latin-1 characters are written as octal escapes, anything else as `?`.
fn escape_pdf_string(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '(' => "\\(".to_string(),
            ')' => "\\)".to_string(),
            '\\' => "\\\\".to_string(),
            c if c.is_ascii() && !c.is_control() => c.to_string(),
            c if c.is_control() => " ".to_string(),
            c if ('\u{a0}'..='\u{ff}').contains(&c) => format!("\\{:03o}", c as u32),
            _ => "?".to_string(),
        })
        .collect()
}
