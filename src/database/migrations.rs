//! Database migration system for Courier.
//!
//! Migrations are versioned and tracked in the `migrations` table. Each
//! migration is run exactly once, in order, inside its own transaction. A
//! migration carries plain SQL statements and, where a schema step has to
//! rewrite row data, a transform function that reads rows into plain
//! values, maps them, and writes the result back. A row the transform
//! cannot interpret is skipped with a warning rather than aborting the
//! migration.

use rusqlite::{params, Connection};

use crate::command::CommandStatus;
use crate::database::schema::{
    ALTER_ADD_ACTION_NEEDED, ALTER_ADD_ERROR_MESSAGE, ALTER_ADD_FAILED, ALTER_ADD_PHOTO_PATHS,
    CREATE_COMMANDS_CREATED_AT_INDEX, CREATE_COMMANDS_FAILED_INDEX, CREATE_COMMANDS_TABLE,
    CREATE_MIGRATIONS_TABLE, RENAME_STATUS_AUDIO_RECORDED, RENAME_STATUS_TRANSCRIBED,
};
use crate::database::StoreError;

/// A database migration with a version number, name, SQL statements, and an
/// optional row-data transform run after the statements.
struct Migration {
    version: i32,
    name: &'static str,
    statements: &'static [&'static str],
    transform: Option<fn(&Connection) -> Result<(), StoreError>>,
}

/// All migrations to be applied, in order.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_commands_table",
        statements: &[CREATE_COMMANDS_TABLE, CREATE_COMMANDS_CREATED_AT_INDEX],
        transform: None,
    },
    Migration {
        version: 2,
        name: "add_photo_paths",
        statements: &[ALTER_ADD_PHOTO_PATHS],
        transform: None,
    },
    Migration {
        version: 3,
        name: "add_error_message_rename_statuses",
        statements: &[
            ALTER_ADD_ERROR_MESSAGE,
            RENAME_STATUS_AUDIO_RECORDED,
            RENAME_STATUS_TRANSCRIBED,
        ],
        transform: None,
    },
    Migration {
        version: 4,
        name: "add_failure_flags",
        statements: &[
            ALTER_ADD_FAILED,
            ALTER_ADD_ACTION_NEEDED,
            CREATE_COMMANDS_FAILED_INDEX,
        ],
        transform: Some(map_legacy_failed_status),
    },
];

/// Maps rows carrying the legacy terminal status 'failed' onto the flag
/// representation: back to the queue with `failed` set, so the command
/// stays visible and retryable instead of silently terminal.
///
/// Rows are read into plain values first and updated afterwards; nothing
/// is mutated mid-scan. Rows whose status matches neither the current enum
/// nor a known legacy value are left untouched.
fn map_legacy_failed_status(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare("SELECT id, status FROM commands")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut mapped = 0usize;
    for (id, status) in rows {
        if status == "failed" {
            conn.execute(
                "UPDATE commands SET status = 'queued', failed = 1 WHERE id = ?1",
                params![id],
            )?;
            mapped += 1;
        } else if status.parse::<CommandStatus>().is_err() {
            tracing::warn!(
                "Skipping command {} with unrecognised status '{}'",
                id,
                status
            );
        }
    }

    if mapped > 0 {
        tracing::info!("Mapped {} legacy failed command(s) back to the queue", mapped);
    }
    Ok(())
}

/// Returns the current schema version from the database.
fn get_current_version(conn: &Connection) -> Result<i32, StoreError> {
    let version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Records a migration as applied.
fn record_migration(conn: &Connection, version: i32, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        (version, name),
    )?;
    Ok(())
}

/// Runs all pending migrations.
///
/// Each migration runs in its own transaction; if a step fails, that
/// migration's changes are rolled back and the error propagates.
pub fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    // First, ensure the migrations table exists
    conn.execute_batch(CREATE_MIGRATIONS_TABLE)?;

    let current_version = get_current_version(conn)?;
    tracing::info!("Current database schema version: {}", current_version);

    // Find migrations that need to be applied
    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
        .collect();

    if pending.is_empty() {
        tracing::info!("Database schema is up to date");
        return Ok(());
    }

    tracing::info!("{} pending migration(s) to apply", pending.len());

    for migration in pending {
        tracing::info!(
            "Applying migration {} (v{})",
            migration.name,
            migration.version
        );

        let tx = conn.transaction()?;

        for statement in migration.statements {
            tx.execute_batch(statement).map_err(|e| {
                StoreError::Migration(format!("Migration {} failed: {}", migration.name, e))
            })?;
        }

        if let Some(transform) = migration.transform {
            transform(&tx).map_err(|e| {
                StoreError::Migration(format!("Migration {} failed: {}", migration.name, e))
            })?;
        }

        record_migration(&tx, migration.version, migration.name)?;
        tx.commit()?;

        tracing::info!("Migration {} applied successfully", migration.name);
    }

    let final_version = get_current_version(conn)?;
    tracing::info!("Database schema now at version {}", final_version);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();

        // Run migrations twice; should not fail
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        // Check that the commands table exists
        let table_exists: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='commands'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(table_exists, 1);
    }

    #[test]
    fn test_migration_version_tracking() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 4);
    }

    /// Seed a v0-layout database with the first migration applied, so later
    /// migrations run against realistic legacy rows.
    fn seed_v0_database(rows: &[(&str, &str)]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE TABLE commands (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                audio_path TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                transcription TEXT
            );
            CREATE INDEX idx_commands_created_at ON commands(created_at);
            INSERT INTO migrations (version, name) VALUES (1, 'create_commands_table');
            "#,
        )
        .unwrap();

        for (id, status) in rows {
            conn.execute(
                "INSERT INTO commands (id, text, status, created_at) VALUES (?1, 'x', ?2, '2025-01-15T10:30:00+00:00')",
                params![id, status],
            )
            .unwrap();
        }

        conn
    }

    fn status_of(conn: &Connection, id: &str) -> String {
        conn.query_row(
            "SELECT status FROM commands WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_status_renames_applied() {
        let mut conn = seed_v0_database(&[
            ("a", "audioRecorded"),
            ("b", "transcribed"),
            ("c", "processing"),
        ]);
        run_migrations(&mut conn).unwrap();

        assert_eq!(status_of(&conn, "a"), "recorded");
        assert_eq!(status_of(&conn, "b"), "queued");
        assert_eq!(status_of(&conn, "c"), "processing");
    }

    #[test]
    fn test_legacy_failed_status_maps_to_queued_with_flag() {
        let mut conn = seed_v0_database(&[("f", "failed")]);
        run_migrations(&mut conn).unwrap();

        assert_eq!(status_of(&conn, "f"), "queued");
        let failed: i32 = conn
            .query_row("SELECT failed FROM commands WHERE id = 'f'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(failed, 1);
    }

    #[test]
    fn test_corrupt_status_skipped_not_fatal() {
        let mut conn = seed_v0_database(&[("bad", "???"), ("ok", "queued")]);
        run_migrations(&mut conn).unwrap();

        // The corrupt row survives untouched and the migration completes
        assert_eq!(status_of(&conn, "bad"), "???");
        assert_eq!(status_of(&conn, "ok"), "queued");

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 4);
    }

    #[test]
    fn test_new_columns_have_defaults_for_existing_rows() {
        let mut conn = seed_v0_database(&[("a", "queued")]);
        run_migrations(&mut conn).unwrap();

        let (photos, failed, action_needed): (String, i32, i32) = conn
            .query_row(
                "SELECT photo_paths, failed, action_needed FROM commands WHERE id = 'a'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(photos, "[]");
        assert_eq!(failed, 0);
        assert_eq!(action_needed, 0);
    }
}
