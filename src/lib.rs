//! medreport — the report-generation core of a clinical-records backend.
//!
//! Pipeline, per generation request:
//! 1. [`ingest::parse`] — uploaded CSV/Excel bytes → ordered lab result
//!    records, with alias-tolerant column lookup and defaulted fields.
//! 2. [`summarize::Summarizer`] — records + patient → summary text; remote
//!    text-generation when a credential is configured, deterministic
//!    fallback otherwise (or on any remote failure).
//! 3. [`compose::compose`] — patient info, results table with abnormal-row
//!    highlighting, and summary → paginated PDF, written atomically.
//! 4. [`store`] — SQLite persistence of patients and report rows.
//!
//! [`service::ReportService`] wires steps 2–4 together for one call.

pub mod compose;
pub mod config;
pub mod ingest;
pub mod models;
pub mod service;
pub mod store;
pub mod summarize;

pub use compose::{compose, ComposeError, ReportLayout, TableRow};
pub use config::AppConfig;
pub use ingest::{parse, IngestError, SourceFormat};
pub use models::{
    LabResult, LabStatus, NewPatient, Patient, PatientUpdate, ReportArtifact, ReportRecord,
};
pub use service::{ReportService, ServiceError};
pub use store::{open_database, open_memory_database, StoreError};
pub use summarize::{fallback_summary, RemoteGenerator, Summarizer, TextGenerator};
