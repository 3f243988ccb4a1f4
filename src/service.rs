//! Report-generation orchestration: one call per request, wiring the
//! summarizer, composer, and store together.
//!
//! Each generation writes to a uniquely named path, so concurrent or
//! repeated requests never contend for a file. Regenerating a report for
//! the same inputs is legitimate and produces a new artifact.

use chrono::Local;
use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

use crate::compose::{compose, ComposeError};
use crate::config::AppConfig;
use crate::models::{LabResult, ReportRecord};
use crate::store::{self, StoreError};
use crate::summarize::Summarizer;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Compose error: {0}")]
    Compose(#[from] ComposeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One report-generation pipeline instance.
pub struct ReportService {
    config: AppConfig,
    summarizer: Summarizer,
}

impl ReportService {
    /// Build a service from configuration; the summarizer backend follows
    /// the configured credential.
    pub fn new(config: AppConfig) -> Self {
        let summarizer = Summarizer::from_config(&config);
        Self { config, summarizer }
    }

    /// Build a service with an explicit summarizer (tests, custom backends).
    pub fn with_summarizer(config: AppConfig, summarizer: Summarizer) -> Self {
        Self { config, summarizer }
    }

    /// Generate a report for a patient: summarize the records, compose the
    /// PDF to a fresh path under the configured reports directory, then
    /// record the artifact. On compose failure nothing is recorded.
    pub fn generate(
        &self,
        conn: &Connection,
        patient_id: i64,
        records: &[LabResult],
    ) -> Result<ReportRecord, ServiceError> {
        let patient = store::get_patient(conn, patient_id)?;
        let summary = self.summarizer.summarize(records, &patient);

        std::fs::create_dir_all(&self.config.reports_dir)?;
        let report_id = Uuid::new_v4().to_string();
        let created_at = Local::now().naive_local();
        let filename = format!(
            "report_{}_{}_{}.pdf",
            patient_id,
            created_at.format("%Y%m%d%H%M%S"),
            &report_id[..8]
        );
        let destination = self.config.reports_dir.join(filename);

        let artifact = compose(&patient, records, &summary, &destination)?;

        let record = ReportRecord {
            id: report_id,
            patient_id,
            report_type: "Lab Results".into(),
            lab_results: artifact.lab_results,
            summary: artifact.summary,
            pdf_path: artifact.file_path.to_string_lossy().into_owned(),
            created_at,
        };
        store::insert_report(conn, &record)?;

        tracing::info!(
            report_id = %record.id,
            patient_id,
            path = %record.pdf_path,
            tests = records.len(),
            "report generated"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LabStatus, NewPatient};
    use crate::store::{create_patient, list_reports_for_patient, open_memory_database, read_artifact};

    fn service(dir: &std::path::Path) -> ReportService {
        let config = AppConfig::default().with_reports_dir(dir);
        ReportService::with_summarizer(config, Summarizer::deterministic())
    }

    fn seed_patient(conn: &Connection) -> i64 {
        create_patient(
            conn,
            &NewPatient {
                name: "Jane Doe".into(),
                age: 42,
                gender: "Female".into(),
                phone: None,
                email: None,
                address: None,
                medical_history: None,
            },
        )
        .unwrap()
        .id
    }

    fn records() -> Vec<LabResult> {
        vec![
            LabResult {
                test_name: "Glucose".into(),
                value: "126".into(),
                unit: "mg/dL".into(),
                reference_range: "70-99".into(),
                status: LabStatus::from_label("High"),
            },
            LabResult {
                test_name: "Sodium".into(),
                value: "140".into(),
                unit: "mmol/L".into(),
                reference_range: "135-145".into(),
                status: LabStatus::Normal,
            },
        ]
    }

    #[test]
    fn generate_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_memory_database().unwrap();
        let patient_id = seed_patient(&conn);

        let record = service(dir.path()).generate(&conn, patient_id, &records()).unwrap();

        assert_eq!(record.patient_id, patient_id);
        assert_eq!(record.report_type, "Lab Results");
        assert_eq!(record.lab_results, records());
        assert!(record.summary.contains("Total Tests Performed: 2"));
        assert!(record.summary.contains("Abnormal Results: 1"));

        // Artifact on disk and retrievable through the store.
        let bytes = read_artifact(&record).unwrap();
        assert_eq!(&bytes[0..4], b"%PDF");

        // Recorded exactly once.
        assert_eq!(list_reports_for_patient(&conn, patient_id).unwrap().len(), 1);
    }

    #[test]
    fn unknown_patient_fails_before_composing() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_memory_database().unwrap();

        let err = service(dir.path()).generate(&conn, 999, &records()).unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::NotFound { .. })));
        // No artifact was written.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn regeneration_yields_distinct_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_memory_database().unwrap();
        let patient_id = seed_patient(&conn);
        let svc = service(dir.path());

        let first = svc.generate(&conn, patient_id, &records()).unwrap();
        let second = svc.generate(&conn, patient_id, &records()).unwrap();

        assert_ne!(first.id, second.id);
        assert_ne!(first.pdf_path, second.pdf_path);
        assert_eq!(list_reports_for_patient(&conn, patient_id).unwrap().len(), 2);
    }

    #[test]
    fn compose_failure_records_nothing() {
        let conn = open_memory_database().unwrap();
        let patient_id = seed_patient(&conn);

        // Reports dir path collides with an existing file, so neither the
        // directory nor the artifact can be created.
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"file, not a dir").unwrap();
        let config = AppConfig::default().with_reports_dir(&blocked);
        let svc = ReportService::with_summarizer(config, Summarizer::deterministic());

        let result = svc.generate(&conn, patient_id, &records());
        assert!(result.is_err());
        assert!(list_reports_for_patient(&conn, patient_id).unwrap().is_empty());
    }
}
