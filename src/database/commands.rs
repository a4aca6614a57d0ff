//! Command record CRUD operations.
//!
//! Provides the durable operations on [`CommandStore`]: full listing,
//! insert, atomic single-field update, and removal. Status strings and
//! photo lists are deserialised-or-rejected at this boundary; a stored row
//! that cannot be interpreted never becomes a live record.

use chrono::{DateTime, Utc};
use rusqlite::params;
use rusqlite::types::Type;

use crate::command::{CommandRecord, CommandStatus};
use crate::database::{CommandStore, StoreError};

/// Column list for all SELECT queries.
const SELECT_COLUMNS: &str = r#"
    id, text, audio_path, photo_paths, status, created_at,
    transcription, error_message, failed, action_needed
"#;

/// An atomic single-field update.
///
/// A closed enum rather than a (name, value) pair so no caller can write an
/// unknown column or an untyped value.
#[derive(Debug, Clone)]
pub enum FieldUpdate {
    Status(CommandStatus),
    Transcription(Option<String>),
    ErrorMessage(Option<String>),
    Failed(bool),
    ActionNeeded(bool),
}

impl FieldUpdate {
    /// The column this update writes, for logging.
    pub fn column(&self) -> &'static str {
        match self {
            FieldUpdate::Status(_) => "status",
            FieldUpdate::Transcription(_) => "transcription",
            FieldUpdate::ErrorMessage(_) => "error_message",
            FieldUpdate::Failed(_) => "failed",
            FieldUpdate::ActionNeeded(_) => "action_needed",
        }
    }
}

/// Map a database row to a CommandRecord.
///
/// Conversion failures (unknown status, malformed timestamp or photo list)
/// surface as row errors so the caller decides whether to skip or abort.
fn row_to_command(row: &rusqlite::Row) -> rusqlite::Result<CommandRecord> {
    let photo_json: String = row.get(3)?;
    let photo_paths: Vec<String> = serde_json::from_str(&photo_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    let status_str: String = row.get(4)?;
    let status: CommandStatus = status_str
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    let created_str: String = row.get(5)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(CommandRecord {
        id: row.get(0)?,
        text: row.get(1)?,
        audio_path: row.get(2)?,
        photo_paths,
        status,
        created_at,
        transcription: row.get(6)?,
        error_message: row.get(7)?,
        failed: row.get::<_, i32>(8)? != 0,
        action_needed: row.get::<_, i32>(9)? != 0,
    })
}

/// True when an insert failed on the primary-key constraint.
fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl CommandStore {
    /// Returns every stored command record, with no implicit filtering.
    ///
    /// Rows that fail deserialisation (corrupt status, malformed photo
    /// list) are logged and skipped rather than poisoning the whole read.
    pub fn get_all(&self) -> Result<Vec<CommandRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM commands ORDER BY created_at DESC",
                SELECT_COLUMNS
            ))?;

            let mut records = Vec::new();
            for row in stmt.query_map([], row_to_command)? {
                match row {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!("Skipping unreadable command row: {}", e),
                }
            }

            Ok(records)
        })
    }

    /// Inserts a new command record.
    ///
    /// Fails with [`StoreError::DuplicateKey`] if the id already exists.
    pub fn add(&self, record: &CommandRecord) -> Result<(), StoreError> {
        let photo_json = serde_json::to_string(&record.photo_paths)?;

        self.with_conn(|conn| {
            let result = conn.execute(
                r#"
                INSERT INTO commands (
                    id, text, audio_path, photo_paths, status, created_at,
                    transcription, error_message, failed, action_needed
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    record.id,
                    record.text,
                    record.audio_path,
                    photo_json,
                    record.status.as_str(),
                    record.created_at.to_rfc3339(),
                    record.transcription,
                    record.error_message,
                    record.failed as i32,
                    record.action_needed as i32,
                ],
            );

            match result {
                Ok(_) => {
                    tracing::debug!("Stored command: {}", record.id);
                    Ok(())
                }
                Err(e) if is_constraint_violation(&e) => {
                    Err(StoreError::DuplicateKey(record.id.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Applies an atomic single-field update.
    ///
    /// Fails with [`StoreError::NotFound`] if the id is absent.
    pub fn update_field(&self, id: &str, update: FieldUpdate) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let rows_affected = match &update {
                FieldUpdate::Status(v) => conn.execute(
                    "UPDATE commands SET status = ?2 WHERE id = ?1",
                    params![id, v.as_str()],
                )?,
                FieldUpdate::Transcription(v) => conn.execute(
                    "UPDATE commands SET transcription = ?2 WHERE id = ?1",
                    params![id, v],
                )?,
                FieldUpdate::ErrorMessage(v) => conn.execute(
                    "UPDATE commands SET error_message = ?2 WHERE id = ?1",
                    params![id, v],
                )?,
                FieldUpdate::Failed(v) => conn.execute(
                    "UPDATE commands SET failed = ?2 WHERE id = ?1",
                    params![id, *v as i32],
                )?,
                FieldUpdate::ActionNeeded(v) => conn.execute(
                    "UPDATE commands SET action_needed = ?2 WHERE id = ?1",
                    params![id, *v as i32],
                )?,
            };

            if rows_affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }

            tracing::debug!("Updated {} on command {}", update.column(), id);
            Ok(())
        })
    }

    /// Deletes a command record by its id.
    ///
    /// Returns `Ok(false)` when the record was already absent; a concurrent
    /// double-delete is an expected race, not an error.
    pub fn remove(&self, id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let rows_affected =
                conn.execute("DELETE FROM commands WHERE id = ?1", params![id])?;

            if rows_affected > 0 {
                tracing::debug!("Deleted command: {}", id);
                Ok(true)
            } else {
                tracing::debug!("Command {} already absent on delete", id);
                Ok(false)
            }
        })
    }
}
