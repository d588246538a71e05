//! Storage error handling
//!
//! Typed errors for opening and writing the local database, with
//! descriptive messages and recovery suggestions.

use std::io;
use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur while opening or writing the local store
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create data directory
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied { path: PathBuf },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull { path: PathBuf },

    /// Another process holds the database lock
    #[error("Database '{path}' is locked by another process")]
    Busy { path: PathBuf },

    /// Failed to open the database
    #[error("Failed to open database '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A stored row could not be decoded
    #[error("Corrupt row '{id}' in {table}: {detail}")]
    CorruptRow {
        table: &'static str,
        id: String,
        detail: String,
    },

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Create an error from an I/O error with path context
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied { path },
            _ if is_disk_full_error(&error) => StorageError::DiskFull { path },
            _ => StorageError::CreateDirectory {
                path,
                source: error,
            },
        }
    }

    /// Create an error from a SQLite error with path context
    ///
    /// Classifies lock contention, permission and disk-full failures.
    pub fn from_sqlite(error: rusqlite::Error, path: PathBuf) -> Self {
        match error.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StorageError::Busy { path }
            }
            Some(ErrorCode::PermissionDenied) | Some(ErrorCode::ReadOnly) => {
                StorageError::PermissionDenied { path }
            }
            Some(ErrorCode::DiskFull) => StorageError::DiskFull { path },
            _ => StorageError::Open {
                path,
                source: error,
            },
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::DiskFull { .. }
                | StorageError::PermissionDenied { .. }
                | StorageError::Busy { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::DiskFull { .. } => Some("Free up disk space and try again."),
            StorageError::PermissionDenied { .. } => {
                Some("Check file and directory permissions of the data directory.")
            }
            StorageError::Busy { .. } => {
                Some("Another bbs process is writing. Wait for it to finish and retry.")
            }
            StorageError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
