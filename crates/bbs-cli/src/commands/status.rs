//! Status command handler

use anyhow::Result;

use bbs_core::Store;

use crate::output::{Output, OutputFormat};

/// Show board contents and sync state at a glance
pub fn show(store: &Store, output: &Output) -> Result<()> {
    let config = store.config();
    let counts = store.counts()?;
    let outbox = store.outbox();
    let pending = outbox.pending_count()?;
    let watermark = outbox.watermark()?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "database": config.sqlite_path(),
                    "counts": {
                        "topics": counts.topics,
                        "threads": counts.threads,
                        "messages": counts.messages,
                        "attachments": counts.attachments
                    },
                    "sync": {
                        "configured": config.is_sync_configured(),
                        "logged_in": config.has_session(),
                        "auto_sync": config.auto_sync,
                        "server_url": config.sync.server_url,
                        "device_id": config.sync.device_id,
                        "pending": pending,
                        "watermark": watermark
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.sqlite_path().display());
        }
        OutputFormat::Human => {
            println!("BBS Status");
            println!("==========");
            println!();
            println!("Storage:");
            println!("  Location: {}", config.sqlite_path().display());
            println!();
            println!("Contents:");
            println!("  Topics:      {}", counts.topics);
            println!("  Threads:     {}", counts.threads);
            println!("  Messages:    {}", counts.messages);
            println!("  Attachments: {}", counts.attachments);
            println!();
            println!("Sync:");
            let state = if !config.is_sync_configured() {
                "not configured"
            } else if config.has_session() {
                "logged in"
            } else {
                "logged out"
            };
            println!("  Status:  {}", state);
            if let Some(ref url) = config.sync.server_url {
                println!("  Server:  {}", url);
            }
            println!("  Pending: {}", pending);
        }
    }

    Ok(())
}
