//! Credential and session management
//!
//! The session lives in the `[sync]` table of the config file. Every change
//! to it (login, refresh, logout) is written back immediately so a crash
//! after a refresh never loses the new token pair.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{debug, info};

use super::error::SyncError;
use super::remote::{RemoteError, RemoteLog, TokenGrant};
use crate::config::Config;
use crate::vault::{derive_key, key_to_base64, AesGcmVault};

/// Refresh when the access token expires within this window
const REFRESH_MARGIN_SECS: i64 = 30;

/// Session manager bound to a config file
pub struct Session {
    config: Config,
    config_path: PathBuf,
}

impl Session {
    pub fn new(config: Config, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// The device id, or `NotConfigured` before `sync init`
    pub fn device_id(&self) -> Result<String, SyncError> {
        self.config
            .sync
            .device_id
            .clone()
            .ok_or_else(|| SyncError::NotConfigured("no device id; run `bbs sync init`".into()))
    }

    pub fn is_logged_in(&self) -> bool {
        self.config.has_session()
    }

    /// Authenticate with email and password
    ///
    /// The device id travels in the login request so the server registers
    /// the device before issuing tokens. Key material is derived from the
    /// recovery secret and stored alongside the token pair.
    pub fn login(
        &mut self,
        remote: &dyn RemoteLog,
        email: &str,
        password: &str,
        secret: &str,
    ) -> Result<(), SyncError> {
        let device_id = self.device_id()?;
        let grant = remote
            .login(email, password, &device_id)
            .map_err(|e| match e {
                RemoteError::Unauthorized => SyncError::InvalidCredentials,
                other => other.into(),
            })?;

        info!(user_id = %grant.user_id, "Logged in");
        self.config.sync.derived_key = Some(key_to_base64(&derive_key(&grant.user_id, secret)));
        self.store_grant(grant);
        self.persist()
    }

    /// Forget the token pair, keeping user id and key material
    pub fn logout(&mut self) -> Result<(), SyncError> {
        self.config.sync.access_token = None;
        self.config.sync.refresh_token = None;
        self.config.sync.token_expires_at = None;
        self.persist()
    }

    /// A usable access token, refreshing first if it is missing or about to expire
    pub fn access_token(&mut self, remote: &dyn RemoteLog) -> Result<String, SyncError> {
        if !self.is_logged_in() {
            return Err(SyncError::AuthExpired);
        }

        let fresh = match self.config.sync.token_expires_at {
            Some(expires_at) => expires_at - Utc::now() > Duration::seconds(REFRESH_MARGIN_SECS),
            None => true,
        };

        match self.config.sync.access_token.clone() {
            Some(token) if fresh => Ok(token),
            _ => self.refresh(remote),
        }
    }

    /// Exchange the refresh token for a new pair and persist it
    pub fn refresh(&mut self, remote: &dyn RemoteLog) -> Result<String, SyncError> {
        let refresh_token = self
            .config
            .sync
            .refresh_token
            .clone()
            .ok_or(SyncError::AuthExpired)?;
        let device_id = self.device_id()?;

        debug!("Refreshing session");
        let grant = remote
            .refresh(&refresh_token, &device_id)
            .map_err(refresh_error)?;
        let access_token = grant.access_token.clone();
        self.store_grant(grant);
        self.persist()?;
        Ok(access_token)
    }

    /// Vault keyed by the stored key material
    pub fn vault(&self) -> Result<AesGcmVault, SyncError> {
        let encoded = self
            .config
            .sync
            .derived_key
            .as_deref()
            .ok_or_else(|| SyncError::NotConfigured("no key material; run `bbs sync login`".into()))?;
        Ok(AesGcmVault::from_base64(encoded)?)
    }

    fn store_grant(&mut self, grant: TokenGrant) {
        let sync = &mut self.config.sync;
        sync.user_id = Some(grant.user_id);
        sync.access_token = Some(grant.access_token);
        sync.refresh_token = Some(grant.refresh_token);
        sync.token_expires_at = Some(grant.expires_at);
    }

    fn persist(&self) -> Result<(), SyncError> {
        self.config
            .save_to_path(&self.config_path)
            .map_err(|e| SyncError::Persist(format!("{:#}", e)))
    }
}

/// A refresh refused with a client error means the token pair is dead
///
/// A stale refresh token comes back as 400 or 403 (`invalid_grant`) as well
/// as 401. Timeouts and rate limits stay transient.
fn refresh_error(err: RemoteError) -> SyncError {
    match err {
        RemoteError::Server { status, .. }
            if (400..500).contains(&status) && status != 408 && status != 429 =>
        {
            SyncError::AuthExpired
        }
        other => other.into(),
    }
}
