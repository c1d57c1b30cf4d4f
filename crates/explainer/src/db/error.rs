//! Errors raised by the job store's SQLite layer.

use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Another process kept the file locked past the busy timeout.
    #[error("Job store is locked by another process: {0}")]
    Busy(#[source] rusqlite::Error),

    #[error("Job store query failed: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("Cannot prepare job store location '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Job store migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// The file was migrated by a newer build than this one.
    #[error("Job store schema v{found} is newer than supported v{supported}")]
    NewerSchema { found: u32, supported: u32 },

    #[error("Job store connection lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    /// Whether the same operation may succeed if tried again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, DatabaseError::Busy(_))
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => DatabaseError::Busy(e),
            _ => DatabaseError::Sqlite(e),
        }
    }
}
