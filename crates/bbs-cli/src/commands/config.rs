//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use bbs_core::Config;

use crate::output::{Output, OutputFormat};

/// Keys `config set` accepts
const SETTABLE_KEYS: &str = "data_dir, server_url, auto_sync, log_file";

/// Show current configuration
///
/// Tokens and key material are never printed.
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "server_url": config.sync.server_url,
                    "auto_sync": config.auto_sync,
                    "log_file": config.log_file,
                    "device_id": config.sync.device_id,
                    "user_id": config.sync.user_id,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:   {}", config.data_dir.display());
            println!(
                "  server_url: {}",
                config.sync.server_url.as_deref().unwrap_or("(not set)")
            );
            println!("  auto_sync:  {}", config.auto_sync);
            println!(
                "  log_file:   {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let cleared = value.is_empty() || value == "none";
    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "server_url" => {
            config.sync.server_url = if cleared { None } else { Some(value.to_string()) };
        }
        "auto_sync" => {
            config.auto_sync = value
                .parse()
                .context("Invalid value for auto_sync. Use 'true' or 'false'.")?;
        }
        "log_file" => {
            config.log_file = if cleared { None } else { Some(value.into()) };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: {}",
                key,
                SETTABLE_KEYS
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::default();

        apply(&mut config, "server_url", "https://bbs.example.com").unwrap();
        apply(&mut config, "auto_sync", "false").unwrap();
        apply(&mut config, "log_file", "/tmp/bbs.log").unwrap();

        assert_eq!(config.sync.server_url.as_deref(), Some("https://bbs.example.com"));
        assert!(!config.auto_sync);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/bbs.log")));

        apply(&mut config, "server_url", "none").unwrap();
        assert!(config.sync.server_url.is_none());
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let mut config = Config::default();

        assert!(apply(&mut config, "auto_sync", "maybe").is_err());
        let err = apply(&mut config, "access_token", "x").unwrap_err();
        assert!(err.to_string().contains("Valid keys"));
    }
}
