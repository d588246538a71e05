//! Identity management
//!
//! Two kinds of identity live here:
//!
//! - **Author identity**: the `user@source` string stamped into `created_by`
//!   on every entity, so humans and agents can be told apart.
//! - **Device identity**: a stable per-installation id generated once by
//!   `sync init` and sent with every login/refresh so the server can bind
//!   tokens to this device.

use std::path::PathBuf;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::config::Config;

/// Username used when nothing else is available
const ANONYMOUS: &str = "anonymous";

/// Build the author identity string for a user
///
/// The username is taken from `override_name`, then `BBS_USER`, then `USER`.
pub fn user_identity(override_name: Option<&str>, source: &str) -> String {
    let username = override_name
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| non_empty_env("BBS_USER"))
        .or_else(|| non_empty_env("USER"))
        .unwrap_or_else(|| ANONYMOUS.to_string());
    format!("{}@{}", username, source)
}

/// Split an identity string into username and source
pub fn parse_identity(identity: &str) -> (&str, &str) {
    match identity.split_once('@') {
        Some((user, source)) => (user, source),
        None => (identity, "unknown"),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Device identity manager
///
/// Owns the configuration and the file it is persisted to.
pub struct Identity {
    config: Config,
    config_path: PathBuf,
}

/// Result of initialization
#[derive(Debug)]
pub struct InitResult {
    /// The device id
    pub device_id: String,
    /// Whether the id was generated by this call
    pub is_new: bool,
}

impl Identity {
    /// Create an identity manager with a specific configuration
    pub fn with_config(config: Config, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
        }
    }

    /// Check whether this installation has a device id
    pub fn is_initialized(&self) -> bool {
        self.config.sync.device_id.is_some()
    }

    /// The device id, if initialized
    pub fn device_id(&self) -> Option<&str> {
        self.config.sync.device_id.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialize sync for this installation
    ///
    /// Generates the device id (time-sortable UUIDv7), turns auto-sync on and
    /// records the server URL if one is given. An existing device id is never
    /// replaced: calling this again only updates the server URL.
    pub fn initialize(&mut self, server_url: Option<String>) -> Result<InitResult> {
        if let Some(url) = server_url {
            self.config.sync.server_url = Some(url);
        }

        let result = match self.config.sync.device_id.clone() {
            Some(device_id) => InitResult {
                device_id,
                is_new: false,
            },
            None => {
                let device_id = Uuid::now_v7().to_string();
                self.config.sync.device_id = Some(device_id.clone());
                self.config.auto_sync = true;
                InitResult {
                    device_id,
                    is_new: true,
                }
            }
        };

        self.config
            .save_to_path(&self.config_path)
            .context("Failed to save device identity")?;
        Ok(result)
    }
}
