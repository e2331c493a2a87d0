//! Durable records for the Ringline platform.
//!
//! Implements the append-only conversation log, the outbound call dispatch
//! log, and the patient directory queries. All functions operate on a
//! borrowed `rusqlite::Connection`; callers own pooling and blocking
//! placement.
//!
//! The conversation log is the durable transcript of every call,
//! independent of in-memory session state: sessions are evicted, log rows
//! persist. Appends are idempotent under retry via the
//! `(call_sid, turn_number, speaker)` dedupe key.

use ringline_types::Speaker;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during record operations.
#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// One persisted half of a conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub call_sid: String,
    pub turn_number: u32,
    pub speaker: Speaker,
    pub text: String,
    /// Synthesized audio artifact for agent turns, when one was produced.
    pub artifact_id: Option<String>,
    /// Write timestamp (ISO 8601, UTC).
    pub created_at: String,
}

/// One outbound call dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallAttempt {
    pub call_sid: Option<String>,
    pub phone_number: String,
    pub status: String,
    pub message: String,
    pub created_at: String,
}

/// A patient directory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub name: String,
    pub phone_number: String,
    pub region_code: String,
}

/// Appends one turn half to the conversation log.
///
/// Idempotent: a retry with the same `(call_sid, turn_number, speaker)` key
/// is ignored rather than duplicated or rejected. Returns `true` when a row
/// was actually written.
pub fn append_turn(
    conn: &Connection,
    call_sid: &str,
    turn_number: u32,
    speaker: Speaker,
    text: &str,
    artifact_id: Option<&str>,
) -> Result<bool, RecordsError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO conversation_turns
            (call_sid, turn_number, speaker, text, artifact_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![call_sid, turn_number, speaker.as_str(), text, artifact_id],
    )?;
    Ok(inserted > 0)
}

/// Reads the ordered transcript for one call.
///
/// Rows are ordered by turn number with the caller's half before the
/// agent's within each turn. Audit path only — the live pipeline keeps its
/// own in-memory history.
pub fn read_history(conn: &Connection, call_sid: &str) -> Result<Vec<ConversationTurn>, RecordsError> {
    let mut stmt = conn.prepare(
        "SELECT call_sid, turn_number, speaker, text, artifact_id, created_at
         FROM conversation_turns
         WHERE call_sid = ?1
         ORDER BY turn_number ASC,
                  CASE speaker WHEN 'caller' THEN 0 ELSE 1 END ASC",
    )?;

    let rows = stmt.query_map([call_sid], map_row_to_turn)?;
    let mut turns = Vec::new();
    for row in rows {
        turns.push(row?);
    }
    Ok(turns)
}

/// Records one outbound dispatch attempt.
pub fn record_call_attempt(
    conn: &Connection,
    call_sid: Option<&str>,
    phone_number: &str,
    status: &str,
    message: &str,
) -> Result<(), RecordsError> {
    conn.execute(
        "INSERT INTO call_attempts (call_sid, phone_number, status, message)
         VALUES (?1, ?2, ?3, ?4)",
        params![call_sid, phone_number, status, message],
    )?;
    Ok(())
}

/// Lists dispatch attempts, newest first.
pub fn list_call_attempts(conn: &Connection, limit: u32) -> Result<Vec<CallAttempt>, RecordsError> {
    let mut stmt = conn.prepare(
        "SELECT call_sid, phone_number, status, message, created_at
         FROM call_attempts
         ORDER BY id DESC
         LIMIT ?1",
    )?;

    let rows = stmt.query_map([limit], |row| {
        Ok(CallAttempt {
            call_sid: row.get(0)?,
            phone_number: row.get(1)?,
            status: row.get(2)?,
            message: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;

    let mut attempts = Vec::new();
    for row in rows {
        attempts.push(row?);
    }
    Ok(attempts)
}

/// Adds a patient to the directory.
pub fn insert_patient(conn: &Connection, patient: &Patient) -> Result<(), RecordsError> {
    conn.execute(
        "INSERT INTO patients (name, phone_number, region_code) VALUES (?1, ?2, ?3)",
        params![patient.name, patient.phone_number, patient.region_code],
    )?;
    Ok(())
}

/// Lists the whole patient directory.
pub fn list_patients(conn: &Connection) -> Result<Vec<Patient>, RecordsError> {
    let mut stmt =
        conn.prepare("SELECT name, phone_number, region_code FROM patients ORDER BY name ASC")?;
    let rows = stmt.query_map([], map_row_to_patient)?;
    let mut patients = Vec::new();
    for row in rows {
        patients.push(row?);
    }
    Ok(patients)
}

/// Finds patients in a region, for building a dispatch list.
pub fn patients_by_region(conn: &Connection, region_code: &str) -> Result<Vec<Patient>, RecordsError> {
    let mut stmt = conn.prepare(
        "SELECT name, phone_number, region_code FROM patients
         WHERE region_code = ?1 ORDER BY name ASC",
    )?;
    let rows = stmt.query_map([region_code], map_row_to_patient)?;
    let mut patients = Vec::new();
    for row in rows {
        patients.push(row?);
    }
    Ok(patients)
}

fn map_row_to_turn(row: &Row<'_>) -> rusqlite::Result<ConversationTurn> {
    let speaker: String = row.get(2)?;
    let speaker = match speaker.as_str() {
        "caller" => Speaker::Caller,
        "agent" => Speaker::Agent,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown speaker: {other}").into(),
            ))
        }
    };

    Ok(ConversationTurn {
        call_sid: row.get(0)?,
        turn_number: row.get(1)?,
        speaker,
        text: row.get(3)?,
        artifact_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_row_to_patient(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        name: row.get(0)?,
        phone_number: row.get(1)?,
        region_code: row.get(2)?,
    })
}
