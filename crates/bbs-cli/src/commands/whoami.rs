//! Whoami command handler

use serde::Serialize;

use bbs_core::{parse_identity, Config};

use crate::output::{Output, OutputFormat};

/// How far this device is along the sync setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncLink {
    /// No device id yet
    NotInitialized,
    /// Device id present but no session
    NotLinked,
    /// Logged in to a server
    Linked,
}

/// Who this invocation posts as, and where it syncs
#[derive(Debug, Serialize)]
pub struct Whoami {
    pub identity: String,
    pub user: String,
    pub source: String,
    pub sync: SyncLink,
    pub device_id: Option<String>,
    pub user_id: Option<String>,
    pub server_url: Option<String>,
}

impl Whoami {
    pub fn new(identity: &str, config: &Config) -> Self {
        let (user, source) = parse_identity(identity);
        let sync = &config.sync;
        let link = if sync.device_id.is_none() {
            SyncLink::NotInitialized
        } else if config.has_session() {
            SyncLink::Linked
        } else {
            SyncLink::NotLinked
        };

        Self {
            identity: identity.to_string(),
            user: user.to_string(),
            source: source.to_string(),
            sync: link,
            device_id: sync.device_id.clone(),
            user_id: sync.user_id.clone(),
            server_url: sync.server_url.clone(),
        }
    }
}

/// Print the author identity and sync link state
pub fn show(identity: &str, config: &Config, output: &Output) {
    let whoami = Whoami::new(identity, config);

    match output.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&whoami) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to encode JSON: {}", e),
        },
        OutputFormat::Quiet => println!("{}", whoami.identity),
        OutputFormat::Human => {
            println!("Identity: {}", whoami.identity);
            match whoami.sync {
                SyncLink::NotInitialized => println!("Sync:     not initialized"),
                SyncLink::NotLinked => {
                    println!("Device:   {}", whoami.device_id.as_deref().unwrap_or_default());
                    println!("Sync:     not linked (run `bbs sync login`)");
                }
                SyncLink::Linked => {
                    println!("Device:   {}", whoami.device_id.as_deref().unwrap_or_default());
                    if let Some(ref user_id) = whoami.user_id {
                        println!("User:     {}", user_id);
                    }
                    println!(
                        "Sync:     enabled (server: {})",
                        whoami.server_url.as_deref().unwrap_or("(not set)")
                    );
                }
            }
        }
    }
}
