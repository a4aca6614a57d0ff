//! Database schema definitions for Courier.
//!
//! Contains SQL statements for creating and evolving the commands table.
//! The column set mirrors the schema history: the base table is the v0
//! layout and each ALTER below belongs to one later migration.

/// SQL statement to create the migrations tracking table.
pub const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQL statement to create the commands table (v0 layout).
pub const CREATE_COMMANDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS commands (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    audio_path TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    transcription TEXT
);
"#;

/// SQL statement to create an index on created_at for newest-first listing.
pub const CREATE_COMMANDS_CREATED_AT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_commands_created_at ON commands(created_at);
"#;

/// v1: photo attachments, stored as a JSON array of filenames.
pub const ALTER_ADD_PHOTO_PATHS: &str =
    "ALTER TABLE commands ADD COLUMN photo_paths TEXT NOT NULL DEFAULT '[]';";

/// v2: failure detail for the last failed operation.
pub const ALTER_ADD_ERROR_MESSAGE: &str = "ALTER TABLE commands ADD COLUMN error_message TEXT;";

/// v2: status value renames from the original naming.
pub const RENAME_STATUS_AUDIO_RECORDED: &str =
    "UPDATE commands SET status = 'recorded' WHERE status = 'audioRecorded';";

pub const RENAME_STATUS_TRANSCRIBED: &str =
    "UPDATE commands SET status = 'queued' WHERE status = 'transcribed';";

/// v3: failure flags superseding the legacy terminal 'failed' status.
pub const ALTER_ADD_FAILED: &str =
    "ALTER TABLE commands ADD COLUMN failed INTEGER NOT NULL DEFAULT 0;";

pub const ALTER_ADD_ACTION_NEEDED: &str =
    "ALTER TABLE commands ADD COLUMN action_needed INTEGER NOT NULL DEFAULT 0;";

/// v3: index for the failed view.
pub const CREATE_COMMANDS_FAILED_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_commands_failed ON commands(failed);
"#;
