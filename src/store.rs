//! SQLite persistence for patients and their generated reports.
//!
//! The report pipeline itself never touches storage: the service calls in
//! here to load the patient and to record the finished artifact. Reports
//! are immutable rows; deleting a patient cascades to their reports.

use std::path::Path;

use chrono::Local;
use rusqlite::{params, Connection};
use thiserror::Error;

use crate::models::{NewPatient, Patient, PatientUpdate, ReportRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Report artifact missing at {0}")]
    ArtifactMissing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },
}

// ─── Connection setup ─────────────────────────────────────────────────────────

/// Open a SQLite connection to the given path and run migrations
pub fn open_database(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing)
pub fn open_memory_database() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=DELETE;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
    )?;
    let current_version = get_current_version(conn);

    let migrations: Vec<(i64, &str)> = vec![
        (1, include_str!("../resources/migrations/001_initial.sql")),
    ];

    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql)
                .and_then(|_| {
                    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
                        .map(|_| ())
                })
                .map_err(|e| StoreError::MigrationFailed {
                    version,
                    reason: e.to_string(),
                })?;
        }
    }

    Ok(())
}

/// Get the current schema version (0 if no schema exists yet)
fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, i64>(0)
    })
    .unwrap_or(0)
}

// ─── Patients ─────────────────────────────────────────────────────────────────

/// Insert a patient and return the stored row.
pub fn create_patient(conn: &Connection, new: &NewPatient) -> Result<Patient, StoreError> {
    let created_at = Local::now().naive_local();
    conn.execute(
        "INSERT INTO patients (name, age, gender, phone, email, address, medical_history, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new.name,
            new.age,
            new.gender,
            new.phone,
            new.email,
            new.address,
            new.medical_history,
            created_at
        ],
    )?;
    get_patient(conn, conn.last_insert_rowid())
}

pub fn get_patient(conn: &Connection, id: i64) -> Result<Patient, StoreError> {
    conn.query_row(
        "SELECT id, name, age, gender, phone, email, address, medical_history, created_at
         FROM patients WHERE id = ?1",
        params![id],
        map_patient_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
            entity_type: "Patient".into(),
            id: id.to_string(),
        },
        other => StoreError::from(other),
    })
}

pub fn list_patients(conn: &Connection) -> Result<Vec<Patient>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, age, gender, phone, email, address, medical_history, created_at
         FROM patients ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt.query_map([], map_patient_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

/// Apply a partial update to a patient and return the updated row.
/// Fields left `None` keep their stored values.
pub fn update_patient(
    conn: &Connection,
    id: i64,
    update: &PatientUpdate,
) -> Result<Patient, StoreError> {
    let mut patient = get_patient(conn, id)?;
    if let Some(name) = &update.name {
        patient.name = name.clone();
    }
    if let Some(age) = update.age {
        patient.age = age;
    }
    if let Some(gender) = &update.gender {
        patient.gender = gender.clone();
    }
    if let Some(phone) = &update.phone {
        patient.phone = Some(phone.clone());
    }
    if let Some(email) = &update.email {
        patient.email = Some(email.clone());
    }
    if let Some(address) = &update.address {
        patient.address = Some(address.clone());
    }
    if let Some(history) = &update.medical_history {
        patient.medical_history = Some(history.clone());
    }

    conn.execute(
        "UPDATE patients
         SET name = ?1, age = ?2, gender = ?3, phone = ?4, email = ?5,
             address = ?6, medical_history = ?7
         WHERE id = ?8",
        params![
            patient.name,
            patient.age,
            patient.gender,
            patient.phone,
            patient.email,
            patient.address,
            patient.medical_history,
            id
        ],
    )?;
    Ok(patient)
}

/// Delete a patient; their reports go with them (cascade).
pub fn delete_patient(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let changed = conn.execute("DELETE FROM patients WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity_type: "Patient".into(),
            id: id.to_string(),
        });
    }
    tracing::info!(patient_id = id, "patient deleted (reports cascaded)");
    Ok(())
}

fn map_patient_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        name: row.get(1)?,
        age: row.get(2)?,
        gender: row.get(3)?,
        phone: row.get(4)?,
        email: row.get(5)?,
        address: row.get(6)?,
        medical_history: row.get(7)?,
        created_at: row.get(8)?,
    })
}

// ─── Reports ──────────────────────────────────────────────────────────────────

/// Insert a finished report row. Lab results are stored as serialized JSON,
/// preserving the record order and field values of the rendered document.
pub fn insert_report(conn: &Connection, report: &ReportRecord) -> Result<(), StoreError> {
    let lab_json = serde_json::to_string(&report.lab_results)?;
    conn.execute(
        "INSERT INTO reports (id, patient_id, report_type, lab_results, summary, pdf_path, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            report.id,
            report.patient_id,
            report.report_type,
            lab_json,
            report.summary,
            report.pdf_path,
            report.created_at
        ],
    )?;
    Ok(())
}

pub fn get_report(conn: &Connection, id: &str) -> Result<ReportRecord, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, patient_id, report_type, lab_results, summary, pdf_path, created_at
             FROM reports WHERE id = ?1",
            params![id],
            map_raw_report_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                entity_type: "Report".into(),
                id: id.to_string(),
            },
            other => StoreError::from(other),
        })?;
    raw.into_record()
}

pub fn list_reports_for_patient(
    conn: &Connection,
    patient_id: i64,
) -> Result<Vec<ReportRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, report_type, lab_results, summary, pdf_path, created_at
         FROM reports WHERE patient_id = ?1 ORDER BY created_at DESC, id",
    )?;
    let rows = stmt.query_map(params![patient_id], map_raw_report_row)?;
    let mut reports = Vec::new();
    for raw in rows {
        reports.push(raw?.into_record()?);
    }
    Ok(reports)
}

/// Row as read from SQLite, lab results still serialized.
struct RawReport {
    id: String,
    patient_id: i64,
    report_type: String,
    lab_json: String,
    summary: String,
    pdf_path: String,
    created_at: chrono::NaiveDateTime,
}

impl RawReport {
    fn into_record(self) -> Result<ReportRecord, StoreError> {
        Ok(ReportRecord {
            lab_results: serde_json::from_str(&self.lab_json)?,
            id: self.id,
            patient_id: self.patient_id,
            report_type: self.report_type,
            summary: self.summary,
            pdf_path: self.pdf_path,
            created_at: self.created_at,
        })
    }
}

fn map_raw_report_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawReport> {
    Ok(RawReport {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        report_type: row.get(2)?,
        lab_json: row.get(3)?,
        summary: row.get(4)?,
        pdf_path: row.get(5)?,
        created_at: row.get(6)?,
    })
}

// ─── Artifact retrieval ───────────────────────────────────────────────────────

/// Read the PDF bytes for a stored report. A missing file is reported as
/// `ArtifactMissing`, distinct from other I/O failures.
pub fn read_artifact(report: &ReportRecord) -> Result<Vec<u8>, StoreError> {
    match std::fs::read(&report.pdf_path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StoreError::ArtifactMissing(report.pdf_path.clone()))
        }
        Err(e) => Err(StoreError::Io(e)),
    }
}
