//! Tabular ingestion of uploaded lab-result sheets.
//!
//! Two source shapes: delimited text (`.csv`) and spreadsheet binary
//! (`.xlsx`/`.xls`). Column headers are matched case- and
//! whitespace-insensitively against an explicit alias table, so both
//! `"Test Name"` and `"test_name"` conventions work. Missing *values* are
//! tolerated and defaulted; malformed *files* fail whole — no partial rows
//! are ever returned.

use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use thiserror::Error;

use crate::models::{LabResult, LabStatus};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported file format: {0} (expected .csv, .xlsx or .xls)")]
    UnsupportedFormat(String),

    #[error("Malformed {format} input: {reason}")]
    Malformed {
        format: &'static str,
        reason: String,
    },

    #[error("Workbook contains no worksheets")]
    EmptyWorkbook,
}

// ─── Format selection ─────────────────────────────────────────────────────────

/// Accepted upload formats, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Xlsx,
    Xls,
}

impl SourceFormat {
    /// Select the format from a filename extension (case-insensitive).
    /// Any other extension is rejected outright.
    pub fn from_filename(filename: &str) -> Result<Self, IngestError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Ok(Self::Csv),
            "xlsx" => Ok(Self::Xlsx),
            "xls" => Ok(Self::Xls),
            _ => Err(IngestError::UnsupportedFormat(filename.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
        }
    }
}

// ─── Column alias mapping ─────────────────────────────────────────────────────

/// Record fields a sheet column can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    TestName,
    Value,
    Unit,
    ReferenceRange,
    Status,
}

/// Normalize a header for lookup: trim, lowercase, and collapse runs of
/// whitespace/underscores so `" Test_Name "` and `"test name"` collide.
fn normalize_header(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    let mut pending_gap = false;
    for ch in header.trim().chars() {
        if ch.is_whitespace() || ch == '_' {
            pending_gap = !out.is_empty();
        } else {
            if pending_gap {
                out.push(' ');
                pending_gap = false;
            }
            out.extend(ch.to_lowercase());
        }
    }
    out
}

/// The explicit header → field mapping table.
fn canonical_field(header: &str) -> Option<Field> {
    match normalize_header(header).as_str() {
        "test name" => Some(Field::TestName),
        "value" => Some(Field::Value),
        "unit" => Some(Field::Unit),
        "reference range" => Some(Field::ReferenceRange),
        "status" => Some(Field::Status),
        _ => None,
    }
}

/// Resolved positions of the known columns within one sheet.
#[derive(Debug, Default, Clone)]
struct ColumnMap {
    test_name: Option<usize>,
    value: Option<usize>,
    unit: Option<usize>,
    reference_range: Option<usize>,
    status: Option<usize>,
}

impl ColumnMap {
    fn from_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Self {
        let mut map = Self::default();
        for (idx, header) in headers.enumerate() {
            // First match wins when a sheet repeats a column.
            match canonical_field(header) {
                Some(Field::TestName) => map.test_name.get_or_insert(idx),
                Some(Field::Value) => map.value.get_or_insert(idx),
                Some(Field::Unit) => map.unit.get_or_insert(idx),
                Some(Field::ReferenceRange) => map.reference_range.get_or_insert(idx),
                Some(Field::Status) => map.status.get_or_insert(idx),
                None => continue,
            };
        }
        map
    }

    /// Build one record from a row of string cells. Entirely empty rows are
    /// skipped (returns `None`); anything else yields a record, with
    /// defaults substituted for missing or blank cells.
    fn record_from_cells(&self, cells: &[String]) -> Option<LabResult> {
        if cells.iter().all(|cell| cell.trim().is_empty()) {
            return None;
        }

        let cell = |idx: Option<usize>| -> Option<&str> {
            idx.and_then(|i| cells.get(i))
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
        };

        Some(LabResult {
            test_name: cell(self.test_name).unwrap_or("Unknown").to_string(),
            value: cell(self.value).unwrap_or("N/A").to_string(),
            unit: cell(self.unit).unwrap_or("").to_string(),
            reference_range: cell(self.reference_range).unwrap_or("N/A").to_string(),
            status: LabStatus::from_label(cell(self.status).unwrap_or("")),
        })
    }
}

// ─── Parsing ──────────────────────────────────────────────────────────────────

/// Parse uploaded bytes into lab result records, preserving source row
/// order. The input is consumed read-only; nothing is retained.
pub fn parse(bytes: &[u8], format: SourceFormat) -> Result<Vec<LabResult>, IngestError> {
    let records = match format {
        SourceFormat::Csv => parse_delimited(bytes)?,
        SourceFormat::Xlsx | SourceFormat::Xls => parse_workbook(bytes)?,
    };
    tracing::debug!(rows = records.len(), format = format.as_str(), "parsed lab results");
    Ok(records)
}

fn parse_delimited(bytes: &[u8]) -> Result<Vec<LabResult>, IngestError> {
    let malformed = |e: csv::Error| IngestError::Malformed {
        format: "CSV",
        reason: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let map = ColumnMap::from_headers(reader.headers().map_err(malformed)?.iter());

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(malformed)?;
        let cells: Vec<String> = row.iter().map(str::to_string).collect();
        if let Some(record) = map.record_from_cells(&cells) {
            records.push(record);
        }
    }
    Ok(records)
}

fn parse_workbook(bytes: &[u8]) -> Result<Vec<LabResult>, IngestError> {
    let malformed = |reason: String| IngestError::Malformed {
        format: "spreadsheet",
        reason,
    };

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| malformed(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or(IngestError::EmptyWorkbook)?
        .map_err(|e| malformed(e.to_string()))?;

    let mut rows = range.rows();
    let header_cells: Vec<String> = match rows.next() {
        Some(row) => row.iter().map(cell_text).collect(),
        None => return Ok(Vec::new()),
    };
    let map = ColumnMap::from_headers(header_cells.iter().map(String::as_str));

    let mut records = Vec::new();
    for row in rows {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        if let Some(record) = map.record_from_cells(&cells) {
            records.push(record);
        }
    }
    Ok(records)
}

/// String-coerce a spreadsheet cell. Numeric cells render with their f64
/// `Display` form; empty cells become empty strings.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPACED_HEADER_CSV: &str = "\
Test Name,Value,Unit,Reference Range,Status
Hemoglobin,13.5,g/dL,12.0-15.5,Normal
Glucose,126,mg/dL,70-99,High
Potassium,4.1,mEq/L,3.5-5.0,Normal
";

    const SNAKE_HEADER_CSV: &str = "\
test_name,value,unit,reference_range,status
WBC,11.2,K/uL,4.5-11.0,Abnormal
";

    #[test]
    fn format_from_extension() {
        assert_eq!(SourceFormat::from_filename("labs.csv").unwrap(), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_filename("LABS.CSV").unwrap(), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_filename("q1.xlsx").unwrap(), SourceFormat::Xlsx);
        assert_eq!(SourceFormat::from_filename("old.xls").unwrap(), SourceFormat::Xls);
    }

    #[test]
    fn unknown_extension_rejected() {
        for name in ["labs.pdf", "labs.txt", "labs", "labs.csv.exe"] {
            let err = SourceFormat::from_filename(name).unwrap_err();
            assert!(matches!(err, IngestError::UnsupportedFormat(_)), "{name}");
        }
    }

    #[test]
    fn parses_rows_in_source_order() {
        let records = parse(SPACED_HEADER_CSV.as_bytes(), SourceFormat::Csv).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].test_name, "Hemoglobin");
        assert_eq!(records[1].test_name, "Glucose");
        assert_eq!(records[2].test_name, "Potassium");
        assert!(records[1].is_abnormal());
        assert_eq!(records[1].status.label(), "High");
        assert!(!records[2].is_abnormal());
    }

    #[test]
    fn snake_case_headers_accepted() {
        let records = parse(SNAKE_HEADER_CSV.as_bytes(), SourceFormat::Csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].test_name, "WBC");
        assert_eq!(records[0].reference_range, "4.5-11.0");
        assert!(records[0].is_abnormal());
    }

    #[test]
    fn mixed_case_padded_headers_accepted() {
        let csv = " TEST_NAME , VALUE ,UNIT,Reference_Range,STATUS\nSodium,140,mmol/L,135-145,\n";
        let records = parse(csv.as_bytes(), SourceFormat::Csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].test_name, "Sodium");
        // Blank status cell defaults to Normal.
        assert!(!records[0].is_abnormal());
    }

    #[test]
    fn missing_columns_get_defaults() {
        let csv = "Test Name,Value\nCalcium,9.4\n";
        let records = parse(csv.as_bytes(), SourceFormat::Csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].test_name, "Calcium");
        assert_eq!(records[0].value, "9.4");
        assert_eq!(records[0].unit, "");
        assert_eq!(records[0].reference_range, "N/A");
        assert_eq!(records[0].status, LabStatus::Normal);
    }

    #[test]
    fn missing_cells_get_defaults() {
        let csv = "Test Name,Value,Unit,Reference Range,Status\n,,,,High\n";
        let records = parse(csv.as_bytes(), SourceFormat::Csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].test_name, "Unknown");
        assert_eq!(records[0].value, "N/A");
        assert_eq!(records[0].reference_range, "N/A");
        assert!(records[0].is_abnormal());
    }

    #[test]
    fn fully_empty_rows_skipped() {
        let csv = "Test Name,Value\nA,1\n,\nB,2\n";
        let records = parse(csv.as_bytes(), SourceFormat::Csv).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].test_name, "A");
        assert_eq!(records[1].test_name, "B");
    }

    #[test]
    fn header_only_sheet_yields_no_records() {
        let records = parse(b"Test Name,Value,Unit\n", SourceFormat::Csv).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn unicode_and_punctuation_preserved() {
        let csv = "Test Name,Value,Unit,Reference Range,Status\n\
                   Vitamine D (25-OH),72.5,nmol/L,\"50–125, adults\",Élevé\n";
        let records = parse(csv.as_bytes(), SourceFormat::Csv).unwrap();
        assert_eq!(records[0].test_name, "Vitamine D (25-OH)");
        assert_eq!(records[0].reference_range, "50–125, adults");
        assert!(records[0].is_abnormal());
        assert_eq!(records[0].status.label(), "Élevé");
    }

    #[test]
    fn invalid_encoding_fails_whole() {
        // Invalid UTF-8 in a cell must fail the parse, not truncate it.
        let mut bytes = b"Test Name,Value\nA,1\nB,".to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFE, 0xFD]);
        bytes.push(b'\n');
        let err = parse(&bytes, SourceFormat::Csv).unwrap_err();
        assert!(matches!(err, IngestError::Malformed { format: "CSV", .. }));
    }

    #[test]
    fn workbook_parses_end_to_end() {
        let bytes = include_bytes!("../tests/fixtures/lab_results.xlsx");
        let records = parse(bytes, SourceFormat::Xlsx).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].test_name, "Hemoglobin");
        assert_eq!(records[1].test_name, "Glucose");
        assert_eq!(records[2].test_name, "Sodium");

        // Numeric cells string-coerce without trailing ".0".
        assert_eq!(records[0].value, "13.5");
        assert_eq!(records[1].value, "126");
        assert_eq!(records[2].value, "140");

        assert_eq!(records[0].unit, "g/dL");
        assert_eq!(records[1].reference_range, "70-99");

        assert!(!records[0].is_abnormal());
        assert!(records[1].is_abnormal());
        assert_eq!(records[1].status.label(), "High");
        // Absent status cell defaults to Normal.
        assert!(!records[2].is_abnormal());
    }

    #[test]
    fn garbage_workbook_is_malformed() {
        let err = parse(b"this is not a spreadsheet", SourceFormat::Xlsx).unwrap_err();
        assert!(matches!(err, IngestError::Malformed { format: "spreadsheet", .. }));
    }

    #[test]
    fn header_normalization() {
        assert_eq!(normalize_header("  Test_Name "), "test name");
        assert_eq!(normalize_header("REFERENCE   RANGE"), "reference range");
        assert_eq!(normalize_header("status"), "status");
        assert_eq!(normalize_header("__value__"), "value");
    }

    #[test]
    fn unrelated_columns_ignored() {
        let csv = "Patient,Test Name,Comment,Value\nJane,TSH,fasting,2.1\n";
        let records = parse(csv.as_bytes(), SourceFormat::Csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].test_name, "TSH");
        assert_eq!(records[0].value, "2.1");
    }

    #[test]
    fn spreadsheet_cells_string_coerced() {
        assert_eq!(cell_text(&Data::Float(126.0)), "126");
        assert_eq!(cell_text(&Data::Float(13.5)), "13.5");
        assert_eq!(cell_text(&Data::String("High".into())), "High");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn column_map_shared_by_both_formats() {
        // The workbook path reuses the same map + defaults logic as CSV.
        let headers = ["Test Name", "Value", "Unit", "Reference Range", "Status"];
        let map = ColumnMap::from_headers(headers.into_iter());
        let cells: Vec<String> = ["Glucose", "126", "mg/dL", "70-99", "High"]
            .into_iter()
            .map(String::from)
            .collect();
        let record = map.record_from_cells(&cells).unwrap();
        assert_eq!(record.test_name, "Glucose");
        assert!(record.is_abnormal());

        let empty: Vec<String> = vec![String::new(); 5];
        assert!(map.record_from_cells(&empty).is_none());
    }
}
