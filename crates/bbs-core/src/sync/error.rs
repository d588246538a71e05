//! Sync error taxonomy

use thiserror::Error;

use super::remote::RemoteError;
use crate::storage::StorageError;
use crate::vault::VaultError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing server URL, device id or key material
    #[error("Sync is not configured: {0}")]
    NotConfigured(String),

    /// No usable session: tokens missing, rejected or not refreshable
    #[error("Session expired. Run `bbs sync login` to sign in again.")]
    AuthExpired,

    /// Login refused the email/password pair
    #[error("Login failed: invalid email or password")]
    InvalidCredentials,

    /// The server does not accept this device id
    #[error("Device rejected by server: {0}")]
    DeviceRejected(String),

    /// Timeout, connectivity or server-side failure; safe to retry
    #[error("Sync temporarily unavailable: {0}")]
    Transient(String),

    /// A single remote Change could not be applied
    #[error("Change {sequence} skipped: {reason}")]
    DataIntegrity { sequence: i64, reason: String },

    #[error("Payload encryption failed: {0}")]
    Vault(#[from] VaultError),

    /// Local database failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Writing the refreshed session to the config file failed
    #[error("Failed to save session: {0}")]
    Persist(String),
}

impl SyncError {
    /// Whether retrying later may succeed without user action
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Storage(StorageError::Database(err))
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unauthorized => SyncError::AuthExpired,
            RemoteError::DeviceRejected(msg) => SyncError::DeviceRejected(msg),
            RemoteError::Timeout => SyncError::Transient("request timed out".to_string()),
            RemoteError::Connect(msg) | RemoteError::Protocol(msg) => SyncError::Transient(msg),
            RemoteError::Server { status, body } => {
                SyncError::Transient(format!("server returned {}: {}", status, body))
            }
        }
    }
}
