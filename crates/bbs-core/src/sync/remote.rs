//! Remote change log
//!
//! The server is an append-only log of sealed Changes. It authenticates a
//! device, accepts pushed Changes (assigning each a sequence number) and
//! serves everything above a given sequence.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::change::{OutgoingChange, RemoteChange};

/// Token pair issued by login or refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// A pushed Change the server stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub change_id: String,
    pub sequence: i64,
}

#[derive(Error, Debug)]
pub enum RemoteError {
    /// Credentials or token not accepted
    #[error("Unauthorized")]
    Unauthorized,

    /// The server refuses this device id
    #[error("Device rejected: {0}")]
    DeviceRejected(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    /// Response did not have the expected shape
    #[error("Unexpected response: {0}")]
    Protocol(String),
}

/// Operations the sync engine needs from the server
pub trait RemoteLog {
    /// Authenticate, registering `device_id` with the account
    fn login(&self, email: &str, password: &str, device_id: &str)
        -> Result<TokenGrant, RemoteError>;

    /// Exchange a refresh token for a new token pair
    fn refresh(&self, refresh_token: &str, device_id: &str) -> Result<TokenGrant, RemoteError>;

    /// Upload a batch, returning the Changes the server stored
    ///
    /// Changes missing from the result were not stored and must be retried.
    fn push(
        &self,
        access_token: &str,
        device_id: &str,
        changes: &[OutgoingChange],
    ) -> Result<Vec<Accepted>, RemoteError>;

    /// Fetch Changes with sequence strictly greater than `since`, ascending
    fn pull(
        &self,
        access_token: &str,
        since: i64,
        limit: usize,
    ) -> Result<Vec<RemoteChange>, RemoteError>;
}
