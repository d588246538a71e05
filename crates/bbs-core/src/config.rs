//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/bbs/config.toml)
//! 3. Environment variables (BBS_* prefix)
//!
//! Environment variables take precedence over config file values.
//!
//! The `[sync]` table is the only input of the session manager: it holds the
//! server URL, device id, token pair and derived key material.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "BBS";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite replica)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Push immediately after every local mutation
    #[serde(default)]
    pub auto_sync: bool,

    /// Log file (stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Sync server settings and credentials
    #[serde(default)]
    pub sync: SyncSettings,
}

/// Persisted sync settings and session credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Base URL of the sync server
    #[serde(default)]
    pub server_url: Option<String>,

    /// Account id assigned by the server at login
    #[serde(default)]
    pub user_id: Option<String>,

    /// Stable per-installation device id (set once by `sync init`)
    #[serde(default)]
    pub device_id: Option<String>,

    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    /// When the access token stops being accepted
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,

    /// Base64 key material derived from the recovery secret.
    /// Survives logout.
    #[serde(default)]
    pub derived_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            auto_sync: false,
            log_file: None,
            sync: SyncSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (BBS_DATA_DIR, BBS_SERVER_URL, BBS_AUTO_SYNC)
    /// 2. Config file (~/.config/bbs/config.toml or BBS_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring an explicit path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_path(p),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // Empty string clears the server
        if let Ok(val) = std::env::var(format!("{}_SERVER_URL", ENV_PREFIX)) {
            self.sync.server_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_AUTO_SYNC", ENV_PREFIX)) {
            self.auto_sync = val.eq_ignore_ascii_case("true") || val == "1";
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    ///
    /// The file holds tokens, so it is written owner-only on unix.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict permissions on {:?}", path))?;
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with BBS_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bbs")
            .join("config.toml")
    }

    /// Get the path to the SQLite database (board, outbox and watermark)
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("bbs.db")
    }

    /// Sync is configured once a device id exists and a server is known.
    ///
    /// Local mutations are only queued for replication when this holds.
    pub fn is_sync_configured(&self) -> bool {
        self.sync.device_id.is_some() && self.sync.server_url.is_some()
    }

    /// A session exists when the server has issued an account and refresh token
    pub fn has_session(&self) -> bool {
        self.sync.user_id.is_some() && self.sync.refresh_token.is_some()
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bbs")
}
