//! Sync command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use bbs_core::sync::{CancelFlag, HttpRemote, Session, SyncListener};
use bbs_core::{Config, Identity, Store, SyncEngine, SyncError, SyncReport};

use crate::output::{short_id, Output, OutputFormat};
use crate::prompt::confirm;

/// Path the session persists to: the `--config` override or the default file
fn effective_config_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path.cloned().unwrap_or_else(Config::config_file_path)
}

fn load_session(config_path: Option<&PathBuf>) -> Result<Session> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    Ok(Session::new(config, effective_config_path(config_path)))
}

fn remote_for(config: &Config) -> Result<HttpRemote> {
    let Some(ref server_url) = config.sync.server_url else {
        bail!(
            "Sync server not configured. Set it with:\n  \
             bbs sync init --server https://your-server"
        );
    };
    Ok(HttpRemote::new(server_url)?)
}

/// Build the engine used for automatic pushes after local writes
///
/// Returns `None` when sync is not configured or nobody is logged in.
pub fn auto_push_engine(config_path: Option<&PathBuf>) -> Option<SyncEngine<HttpRemote>> {
    let session = load_session(config_path).ok()?;
    let config = session.config();
    if !config.auto_sync || !config.is_sync_configured() || !session.is_logged_in() {
        return None;
    }
    let remote = remote_for(config).ok()?;
    Some(SyncEngine::new(remote, session))
}

/// Generate this device's id and record the server
pub fn init(server: Option<String>, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    let mut identity = Identity::with_config(config, effective_config_path(config_path));
    let result = identity.initialize(server)?;
    let server_url = identity.config().sync.server_url.clone();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "device_id": result.device_id,
                    "is_new": result.is_new,
                    "server_url": server_url,
                })
            );
        }
        OutputFormat::Quiet => println!("{}", result.device_id),
        OutputFormat::Human => {
            if result.is_new {
                println!("✓ Sync initialized.");
            } else {
                println!("Already initialized.");
            }
            println!("  Device: {}", result.device_id);
            match server_url {
                Some(url) => println!("  Server: {}", url),
                None => {
                    println!();
                    println!("Sync server not configured. Set one with:");
                    println!("  bbs sync init --server https://your-server");
                }
            }
            println!();
            println!("Next: bbs sync login --email you@example.com");
        }
    }

    Ok(())
}

/// Log in and store the token pair and key material
pub fn login(
    email: String,
    password: String,
    secret: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut session = load_session(config_path)?;
    let remote = remote_for(session.config())?;

    session
        .login(&remote, &email, &password, &secret)
        .context("Login failed")?;

    let user_id = session.config().sync.user_id.clone().unwrap_or_default();
    output.success(&format!("Logged in as {} ({})", email, user_id));
    Ok(())
}

/// Forget the token pair
pub fn logout(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let mut session = load_session(config_path)?;
    if !session.is_logged_in() {
        output.message("Not logged in.");
        return Ok(());
    }

    session.logout()?;
    output.success("Logged out");
    Ok(())
}

/// Prints progress for interactive sync rounds
struct ProgressListener {
    verbose: bool,
}

impl SyncListener for ProgressListener {
    fn on_start(&mut self) {
        if self.verbose {
            println!("Syncing...");
        }
    }

    fn on_push_progress(&mut self, pushed: usize, remaining: usize) {
        if self.verbose {
            println!("  pushed {} change(s), {} remaining", pushed, remaining);
        }
    }
}

/// Run a full push + pull round
///
/// Ctrl-C stops the round between batches; the next run resumes.
pub fn now(store: &Store, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let session = load_session(config_path)?;
    let remote = remote_for(session.config())?;

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || handler_flag.cancel())
        .context("Failed to install Ctrl-C handler")?;

    let listener = ProgressListener {
        verbose: output.format == OutputFormat::Human,
    };
    let mut engine = SyncEngine::new(remote, session)
        .with_listener(Box::new(listener))
        .with_cancel_flag(cancel);

    let report = match engine.sync(store.connection()) {
        Ok(report) => report,
        Err(e) => return Err(explain(e)),
    };

    print_report(&report, output);
    Ok(())
}

/// Attach the next step a user should take to a sync failure
fn explain(err: SyncError) -> anyhow::Error {
    let hint = match &err {
        SyncError::NotConfigured(_) => Some("run `bbs sync init --server <url>`"),
        SyncError::AuthExpired | SyncError::InvalidCredentials => Some("run `bbs sync login`"),
        SyncError::DeviceRejected(_) => {
            Some("this device is no longer registered; run `bbs sync login` again")
        }
        _ if err.is_transient() => Some("nothing was lost; try again later"),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(err).context(format!("Sync failed ({})", hint)),
        None => anyhow::Error::new(err).context("Sync failed"),
    }
}

fn print_report(report: &SyncReport, output: &Output) {
    match output.format {
        OutputFormat::Json => {
            let skipped: Vec<_> = report
                .skipped
                .iter()
                .map(|s| serde_json::json!({"sequence": s.sequence, "reason": s.reason}))
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "pushed": report.pushed,
                    "applied": report.applied,
                    "ignored": report.ignored,
                    "skipped": skipped,
                    "watermark": report.watermark,
                    "cancelled": report.cancelled,
                })
            );
        }
        OutputFormat::Quiet => {}
        OutputFormat::Human => {
            if report.cancelled {
                println!("Sync cancelled; run `bbs sync now` to resume.");
            } else {
                println!("✓ Sync complete");
            }
            println!(
                "  Pushed: {}, Applied: {}, Ignored: {}, Watermark: {}",
                report.pushed, report.applied, report.ignored, report.watermark
            );
            for skipped in &report.skipped {
                println!("  ⚠ {}", skipped.to_error());
            }
        }
    }
}

/// Show sync configuration, session and queue state
pub fn status(store: &Store, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    let outbox = store.outbox();
    let pending = outbox.pending_count()?;
    let watermark = outbox.watermark()?;
    let sync = &config.sync;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "configured": config.is_sync_configured(),
                    "logged_in": config.has_session(),
                    "auto_sync": config.auto_sync,
                    "server_url": sync.server_url,
                    "user_id": sync.user_id,
                    "device_id": sync.device_id,
                    "token_expires_at": sync.token_expires_at,
                    "pending": pending,
                    "watermark": watermark,
                })
            );
        }
        OutputFormat::Quiet => println!("{}", pending),
        OutputFormat::Human => {
            let not_set = "(not set)";
            println!("Sync:");
            println!("  Server:    {}", sync.server_url.as_deref().unwrap_or(not_set));
            println!("  Device:    {}", sync.device_id.as_deref().unwrap_or(not_set));
            println!("  User:      {}", sync.user_id.as_deref().unwrap_or(not_set));
            println!(
                "  Session:   {}",
                if config.has_session() { "logged in" } else { "logged out" }
            );
            if let Some(expires_at) = sync.token_expires_at {
                println!("  Token exp: {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            println!("  Auto-sync: {}", if config.auto_sync { "on" } else { "off" });
            println!();
            println!("  Pending:   {}", pending);
            println!("  Watermark: {}", watermark);
        }
    }

    Ok(())
}

/// List Changes waiting to be pushed
pub fn pending(store: &Store, output: &Output) -> Result<()> {
    let changes = store.outbox().pending()?;

    match output.format {
        OutputFormat::Json => {
            let items: Vec<_> = changes
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "change_id": c.id,
                        "entity": c.entity,
                        "entity_id": c.entity_id,
                        "op": c.op,
                        "created_at": c.created_at,
                    })
                })
                .collect();
            println!("{}", serde_json::json!(items));
        }
        OutputFormat::Quiet => {
            for change in &changes {
                println!("{}", change.id);
            }
        }
        OutputFormat::Human => {
            if changes.is_empty() {
                println!("No pending changes.");
                return Ok(());
            }
            for change in &changes {
                println!(
                    "{} | {:<6} | {:<10} | {}",
                    change.created_at.format("%Y-%m-%d %H:%M:%S"),
                    change.op,
                    change.entity,
                    short_id(&change.entity_id)
                );
            }
            println!("\n{} pending change(s)", changes.len());
        }
    }

    Ok(())
}

/// Drop the outbox and reset the watermark
///
/// The next pull replays the whole remote log.
pub fn wipe(store: &Store, force: bool, output: &Output) -> Result<()> {
    if !force && output.should_prompt() {
        let pending = store.outbox().pending_count()?;
        println!(
            "This discards {} unsynced change(s) and resets the sync watermark.",
            pending
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.outbox().wipe().context("Failed to wipe sync state")?;
    output.success("Sync state wiped");
    Ok(())
}
