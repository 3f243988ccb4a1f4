//! PDF report composition.
//!
//! Two stages: `ReportLayout::build` assembles the pure, inspectable
//! structure (title, patient block, table rows, summary), then `render_pdf`
//! lays it onto pages via `printpdf`. `compose` renders fully to memory and
//! writes the destination atomically through a temp file, so a failed
//! compose never leaves a partial artifact behind.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use printpdf::*;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::models::{LabResult, Patient, ReportArtifact};

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("PDF rendering failed: {0}")]
    Render(String),

    #[error("Cannot write report to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ─── Layout ───────────────────────────────────────────────────────────────────

pub const REPORT_TITLE: &str = "MEDICAL LABORATORY REPORT";
pub const DISCLAIMER: &str =
    "This is a computer-generated report. For medical advice, please consult your physician.";

pub const TABLE_HEADER: [&str; 5] = ["Test Name", "Value", "Unit", "Reference Range", "Status"];

/// One rendered results-table row. Cell text is taken verbatim from the
/// record; `abnormal` drives the single conditional styling rule.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub cells: [String; 5],
    pub abnormal: bool,
}

impl TableRow {
    fn from_record(record: &LabResult) -> Self {
        Self {
            cells: [
                record.test_name.clone(),
                record.value.clone(),
                record.unit.clone(),
                record.reference_range.clone(),
                record.status.label().to_string(),
            ],
            abnormal: record.is_abnormal(),
        }
    }
}

/// The document structure, in fixed section order. Built once per compose
/// call; tests inspect this instead of parsing PDF bytes.
#[derive(Debug, Clone)]
pub struct ReportLayout {
    pub title: &'static str,
    pub report_date: String,
    pub patient_info: Vec<(&'static str, String)>,
    pub rows: Vec<TableRow>,
    pub summary: String,
    pub disclaimer: &'static str,
}

impl ReportLayout {
    pub fn build(patient: &Patient, records: &[LabResult], summary: &str) -> Self {
        let or_na = |field: &Option<String>| {
            field
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("N/A")
                .to_string()
        };

        Self {
            title: REPORT_TITLE,
            report_date: format!("Report Date: {}", Local::now().format("%B %d, %Y")),
            patient_info: vec![
                ("Name:", patient.name.clone()),
                ("Age:", patient.age.to_string()),
                ("Gender:", patient.gender.clone()),
                ("Phone:", or_na(&patient.phone)),
                ("Email:", or_na(&patient.email)),
            ],
            rows: records.iter().map(TableRow::from_record).collect(),
            summary: summary.to_string(),
            disclaimer: DISCLAIMER,
        }
    }
}

// ─── Rendering ────────────────────────────────────────────────────────────────

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const MARGIN_LEFT: Mm = Mm(20.0);
const TOP_Y: Mm = Mm(277.0);
const BOTTOM_Y: Mm = Mm(20.0);

/// Left edge of each table column, in mm.
const COLUMN_X: [f32; 5] = [20.0, 75.0, 100.0, 120.0, 160.0];

fn heading_color() -> Color {
    Color::Rgb(Rgb::new(0.20, 0.44, 0.66, None))
}

fn abnormal_color() -> Color {
    Color::Rgb(Rgb::new(0.80, 0.13, 0.13, None))
}

fn black() -> Color {
    Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None))
}

#[derive(Clone, Copy)]
enum Face {
    Regular,
    Bold,
    Oblique,
}

/// Cursor-based page writer. Adds a fresh page whenever a line would pass
/// the bottom margin, so long tables and summaries paginate.
struct Renderer {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    y: Mm,
    page_count: usize,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    oblique: IndirectFontRef,
}

impl Renderer {
    fn new(title: &str) -> Result<Self, ComposeError> {
        fn font_err<E: std::fmt::Display>(e: E) -> ComposeError {
            ComposeError::Render(format!("PDF font error: {e}"))
        }

        let (doc, page1, layer1) = PdfDocument::new(title, PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
        let layer = doc.get_page(page1).get_layer(layer1);
        let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(font_err)?;
        let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(font_err)?;
        let oblique = doc
            .add_builtin_font(BuiltinFont::HelveticaOblique)
            .map_err(font_err)?;

        Ok(Self {
            doc,
            layer,
            y: TOP_Y,
            page_count: 1,
            regular,
            bold,
            oblique,
        })
    }

    fn ensure_space(&mut self, needed: Mm) {
        if self.y.0 - needed.0 < BOTTOM_Y.0 {
            let (page, layer) = self.doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = TOP_Y;
            self.page_count += 1;
        }
    }

    /// Place text at an explicit x without advancing the cursor.
    fn text_at(&self, text: &str, size: f32, x: Mm, face: Face) {
        let font = match face {
            Face::Regular => &self.regular,
            Face::Bold => &self.bold,
            Face::Oblique => &self.oblique,
        };
        self.layer.use_text(text, size, x, self.y, font);
    }

    /// Place a full line at the left margin and advance the cursor.
    fn line(&mut self, text: &str, size: f32, face: Face, leading: Mm) {
        self.ensure_space(leading);
        self.text_at(text, size, MARGIN_LEFT, face);
        self.y -= leading;
    }

    fn heading(&mut self, text: &str) {
        self.ensure_space(Mm(14.0));
        self.y -= Mm(4.0);
        self.layer.set_fill_color(heading_color());
        self.text_at(text, 13.0, MARGIN_LEFT, Face::Bold);
        self.layer.set_fill_color(black());
        self.y -= Mm(7.0);
    }

    fn table_row(&mut self, cells: &[String; 5], abnormal: bool) {
        self.ensure_space(Mm(5.0));
        for (idx, cell) in cells.iter().enumerate() {
            let is_status_cell = idx == 4;
            if is_status_cell && abnormal {
                self.layer.set_fill_color(abnormal_color());
                self.text_at(cell, 9.0, Mm(COLUMN_X[idx]), Face::Bold);
                self.layer.set_fill_color(black());
            } else {
                self.text_at(cell, 9.0, Mm(COLUMN_X[idx]), Face::Regular);
            }
        }
        self.y -= Mm(5.0);
    }

    fn finish(self) -> Result<Vec<u8>, ComposeError> {
        let mut buf = BufWriter::new(Vec::new());
        self.doc
            .save(&mut buf)
            .map_err(|e| ComposeError::Render(format!("PDF save error: {e}")))?;
        buf.into_inner()
            .map_err(|e| ComposeError::Render(format!("PDF buffer error: {e}")))
    }
}

fn render(layout: &ReportLayout) -> Result<Renderer, ComposeError> {
    let mut r = Renderer::new(layout.title)?;

    // Title block + generation timestamp
    r.line(layout.title, 18.0, Face::Bold, Mm(10.0));
    r.line(&layout.report_date, 10.0, Face::Regular, Mm(8.0));

    // Patient information
    r.heading("Patient Information");
    for (key, value) in &layout.patient_info {
        r.ensure_space(Mm(5.5));
        r.text_at(key, 10.0, MARGIN_LEFT, Face::Bold);
        r.text_at(value, 10.0, Mm(60.0), Face::Regular);
        r.y -= Mm(5.5);
    }

    // Results table
    r.heading("Laboratory Test Results");
    r.ensure_space(Mm(6.0));
    for (idx, header) in TABLE_HEADER.iter().enumerate() {
        r.text_at(header, 10.0, Mm(COLUMN_X[idx]), Face::Bold);
    }
    r.y -= Mm(6.0);
    for row in &layout.rows {
        r.table_row(&row.cells, row.abnormal);
    }

    // Clinical summary, word-wrapped
    r.heading("Clinical Summary");
    for paragraph in layout.summary.lines() {
        if paragraph.trim().is_empty() {
            r.y -= Mm(3.0);
            continue;
        }
        for line in wrap_text(paragraph, 95) {
            r.line(&line, 10.0, Face::Regular, Mm(4.8));
        }
    }

    // Disclaimer footer
    r.y -= Mm(8.0);
    for line in wrap_text(layout.disclaimer, 110) {
        r.line(&line, 8.0, Face::Oblique, Mm(3.8));
    }

    Ok(r)
}

/// Render a layout to PDF bytes, entirely in memory.
pub fn render_pdf(layout: &ReportLayout) -> Result<Vec<u8>, ComposeError> {
    let renderer = render(layout)?;
    tracing::debug!(
        pages = renderer.page_count,
        rows = layout.rows.len(),
        "rendered report"
    );
    renderer.finish()
}

/// Compose the report document and write it to `destination`.
///
/// On any failure no file exists at the destination: rendering happens in
/// memory and the write goes through a temp file in the destination
/// directory, finalized with an atomic rename.
pub fn compose(
    patient: &Patient,
    records: &[LabResult],
    summary: &str,
    destination: &Path,
) -> Result<ReportArtifact, ComposeError> {
    let layout = ReportLayout::build(patient, records, summary);
    let bytes = render_pdf(&layout)?;
    write_atomic(destination, &bytes)?;

    Ok(ReportArtifact {
        patient_id: patient.id,
        lab_results: records.to_vec(),
        summary: summary.to_string(),
        file_path: destination.to_path_buf(),
    })
}

fn write_atomic(destination: &Path, bytes: &[u8]) -> Result<(), ComposeError> {
    let write_err = |source: std::io::Error| ComposeError::Write {
        path: destination.to_path_buf(),
        source,
    };

    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.persist(destination).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Simple word-wrap helper for PDF text rendering.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.chars().count() + word.chars().count() + 1 > max_chars && !current.is_empty() {
            lines.push(current.clone());
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}
