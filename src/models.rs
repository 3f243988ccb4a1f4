//! Core data model: lab result records, patients, and report artifacts.
//!
//! `LabResult::is_abnormal` is the single classification predicate used by
//! both the summarizer's abnormal counts and the composer's row
//! highlighting, so the two can never disagree.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ─── Lab results ──────────────────────────────────────────────────────────────

/// Normal/abnormal classification of a single test row.
///
/// Classification is purely label-driven: whatever string the source sheet
/// carried in its status column. Anything that is not a case-insensitive
/// `"normal"` counts as abnormal, and the original label (`"High"`,
/// `"Critical Low"`, ...) is preserved verbatim for rendering. An absent or
/// empty label defaults to `Normal` — the value is never compared against
/// the reference range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LabStatus {
    Normal,
    Abnormal(String),
}

impl LabStatus {
    /// Classify a source label. Empty or `"normal"` (any casing) is `Normal`.
    pub fn from_label(label: &str) -> Self {
        let trimmed = label.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("normal") {
            Self::Normal
        } else {
            Self::Abnormal(trimmed.to_string())
        }
    }

    /// The label to render, original casing preserved for abnormal rows.
    pub fn label(&self) -> &str {
        match self {
            Self::Normal => "Normal",
            Self::Abnormal(label) => label,
        }
    }

    pub fn is_abnormal(&self) -> bool {
        matches!(self, Self::Abnormal(_))
    }
}

impl From<String> for LabStatus {
    fn from(label: String) -> Self {
        Self::from_label(&label)
    }
}

impl From<LabStatus> for String {
    fn from(status: LabStatus) -> Self {
        status.label().to_string()
    }
}

impl Default for LabStatus {
    fn default() -> Self {
        Self::Normal
    }
}

/// One row of a diagnostic test, as ingested from an uploaded sheet.
///
/// All fields are strings taken verbatim from the source; numeric cells are
/// string-coerced at ingestion and never rounded or converted afterwards.
/// Missing fields get documented defaults (`"Unknown"` name, `"N/A"` value
/// and range, empty unit) at the ingestion boundary only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    pub test_name: String,
    pub value: String,
    pub unit: String,
    pub reference_range: String,
    #[serde(default)]
    pub status: LabStatus,
}

impl LabResult {
    /// Single source of truth for the abnormal/normal partition.
    pub fn is_abnormal(&self) -> bool {
        self.status.is_abnormal()
    }
}

// ─── Patients ─────────────────────────────────────────────────────────────────

/// Stored patient. Read-only for the summarizer and composer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub medical_history: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Fields for creating a patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPatient {
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub medical_history: Option<String>,
}

/// Partial patient update: fields left `None` keep their stored values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientUpdate {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub medical_history: Option<String>,
}

// ─── Reports ──────────────────────────────────────────────────────────────────

/// The outcome of one compose call: a document file plus the inputs that
/// produced it. Created once per generation request, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub patient_id: i64,
    pub lab_results: Vec<LabResult>,
    pub summary: String,
    pub file_path: PathBuf,
}

/// Durable report row: an artifact plus identity and bookkeeping metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: String,
    pub patient_id: i64,
    pub report_type: String,
    pub lab_results: Vec<LabResult>,
    pub summary: String,
    pub pdf_path: String,
    pub created_at: NaiveDateTime,
}
