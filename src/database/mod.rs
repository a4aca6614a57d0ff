//! Database module for Courier.
//!
//! Provides SQLite-backed durable storage for command records, with
//! versioned migrations. The store is an explicitly constructed value owned
//! by the composition root and handed to consumers; there is no ambient
//! global connection.

pub mod commands;
pub mod migrations;
pub mod schema;

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

pub use commands::FieldUpdate;

/// Store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode record field: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("A command with id {0} already exists")]
    DuplicateKey(String),

    #[error("No command found with id {0}")]
    NotFound(String),

    #[error("Store has been closed")]
    Closed,
}

/// Returns the default Courier data directory (~/.courier).
pub fn default_data_dir() -> Result<PathBuf, StoreError> {
    let home = dirs::home_dir().ok_or_else(|| {
        StoreError::DirectoryCreation(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not find home directory",
        ))
    })?;

    Ok(home.join(".courier"))
}

/// Returns the default database path (~/.courier/courier.db).
pub fn default_database_path() -> Result<PathBuf, StoreError> {
    Ok(default_data_dir()?.join("courier.db"))
}

/// Durable storage for command records, keyed by command id.
///
/// Owns a single SQLite connection behind a mutex. All access goes through
/// the CRUD methods in [`commands`]; migrations run once at open time.
pub struct CommandStore {
    conn: Mutex<Option<Connection>>,
}

impl CommandStore {
    /// Opens (or creates) the database at `path` and runs pending
    /// migrations. Creates the parent directory if it does not exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created data directory at {:?}", parent);
            }
        }

        tracing::info!("Opening command store at {:?}", path);
        let conn = Connection::open(path)?;
        Self::initialise(conn)
    }

    /// Opens an in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::initialise(Connection::open_in_memory()?)
    }

    fn initialise(mut conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Runs `f` against the live connection, failing with
    /// [`StoreError::Closed`] after [`close`](Self::close) has been called.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        f(conn)
    }

    /// Releases the underlying connection. Idempotent: closing an already
    /// closed store is a no-op.
    pub fn close(&self) {
        let mut guard = self.conn.lock();
        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                // The handle is dropped either way; log and move on.
                tracing::warn!("Error closing command store: {}", e);
            } else {
                tracing::info!("Command store closed");
            }
        }
    }
}
