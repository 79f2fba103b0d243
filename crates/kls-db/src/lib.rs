//! `SQLite` storage layer for the symbol index.
//!
//! The database file is the source of truth for all persisted symbols. The
//! only supported migration policy is wipe-and-recreate: when the stored
//! schema version differs from [`DB_VERSION`], the file is deleted and the
//! schema is re-applied from scratch. When no storage directory is
//! configured, an in-memory database is used and persistence is disabled.

mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use thiserror::Error;

pub use schema::SCHEMA;

/// Embedded schema version. Bump on any schema change.
pub const DB_VERSION: i64 = 6;

/// On-disk file name under the configured storage path.
pub const DB_FILENAME: &str = "kls_database.db";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database connection mutex poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Owns the single shared connection.
///
/// All access goes through [`Database::connection`]; writers wrap their
/// statements in transactions and serialise naturally through the lock.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens the store under `storage_path`, or in memory when `storage_path`
    /// is `None` or not a directory.
    pub fn open(storage_path: Option<&Path>) -> Result<Self> {
        match storage_path {
            Some(dir) if dir.is_dir() => Self::open_on_disk(dir),
            Some(dir) => {
                tracing::warn!(
                    target = "kls.db",
                    path = %dir.display(),
                    "storage path is not a directory; falling back to in-memory database"
                );
                Self::open_in_memory()
            }
            None => Self::open_in_memory(),
        }
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, None)
    }

    fn open_on_disk(dir: &Path) -> Result<Self> {
        let path = dir.join(DB_FILENAME);
        let conn = Connection::open(&path)?;

        if Self::stored_version(&conn) != Some(DB_VERSION) {
            // Schema mismatch (or fresh/corrupt file): wipe and recreate.
            tracing::info!(
                target = "kls.db",
                path = %path.display(),
                version = DB_VERSION,
                "database schema version mismatch; deleting and recreating"
            );
            drop(conn);
            std::fs::remove_file(&path)?;
            let conn = Connection::open(&path)?;
            return Self::initialize(conn, Some(path));
        }

        Self::initialize(conn, Some(path))
    }

    fn initialize(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;

        conn.execute(
            "INSERT INTO DatabaseMetadata (id, version) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET version = ?1",
            [DB_VERSION],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    fn stored_version(conn: &Connection) -> Option<i64> {
        conn.query_row("SELECT version FROM DatabaseMetadata WHERE id = 1", [], |row| {
            row.get(0)
        })
        .ok()
    }

    /// Acquire the connection lock.
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// `None` when running in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }
}
