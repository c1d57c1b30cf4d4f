//! Persistence engine for the job store.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access is serialized through a `Mutex<Connection>`; statements are
//! short field-level writes scoped to a single job row, so the lock is never
//! held across an await point.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

pub mod error;
pub mod job_repo;
pub mod migrations;
pub mod user_repo;

pub use error::DatabaseError;

/// How long a connection waits for another process (the intake boundary)
/// to release its write lock before failing with `DatabaseError::Busy`.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). WAL mode is enabled so the worker process
/// and the intake/status process can read and write the same file; a write
/// that stays blocked past the busy timeout surfaces as a transient error.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the job store file and brings its schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::open_with_busy_timeout(path, BUSY_TIMEOUT)
    }

    pub fn open_with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let applied = migrations::run_all(&mut conn)?;
        log::info!(
            "Job store opened at {} (schema v{}, {} migration(s) applied)",
            path.display(),
            migrations::latest_version(),
            applied
        );

        Ok(Self::wrap(conn))
    }

    /// Private in-memory store, used by unit tests.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&mut conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs `f` with exclusive use of the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let result = f(&conn);
        if let Err(e) = &result {
            if e.is_transient() {
                log::warn!("Job store busy: {}", e);
            }
        }
        result
    }

    pub fn schema_version(&self) -> Result<u32, DatabaseError> {
        self.with_conn(migrations::schema_version)
    }
}

/// Returns the canonical data directory: `~/.explainer/data`.
pub fn default_data_directory() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".explainer").join("data"))
}
