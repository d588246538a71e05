//! BBS CLI
//!
//! Command-line interface for BBS - topics, threads and messages shared by
//! humans and agents.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bbs_core::{user_identity, Config, StorageError, Store};

mod commands;
mod output;
mod prompt;

use output::{Output, OutputFormat};

/// Source tag stamped into author identities created from this binary
const IDENTITY_SOURCE: &str = "cli";

#[derive(Parser)]
#[command(name = "bbs")]
#[command(about = "BBS - Local-first message board for humans and agents")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Post as this user (defaults to BBS_USER, then USER)
    #[arg(long = "as", global = true, value_name = "USER")]
    as_user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage topics
    Topic {
        #[command(subcommand)]
        command: TopicCommands,
    },
    /// Manage threads
    Thread {
        #[command(subcommand)]
        command: ThreadCommands,
    },
    /// Post a message to a thread
    Post {
        /// Thread ID (full UUID or prefix)
        thread: String,
        /// Message text
        content: String,
    },
    /// Manage messages and attachments
    Message {
        #[command(subcommand)]
        command: MessageCommands,
    },
    /// Sync with the remote server
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show board and sync status
    Status,
    /// Show who you post as and whether sync is linked
    Whoami,
}

#[derive(Subcommand)]
enum TopicCommands {
    /// Create a topic
    #[command(alias = "add")]
    Create {
        /// Unique topic name
        name: String,
        /// Short description
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List topics
    #[command(alias = "ls")]
    List {
        /// Include archived topics
        #[arg(short, long)]
        all: bool,
    },
    /// Show a topic and its threads
    Show {
        /// Topic name, ID or ID prefix
        topic: String,
    },
    /// Hide a topic from the default listing
    Archive { topic: String },
    /// Bring an archived topic back
    Unarchive { topic: String },
    /// Replace a topic's description
    Describe { topic: String, description: String },
    /// Delete a topic and everything in it
    #[command(alias = "rm")]
    Delete {
        topic: String,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ThreadCommands {
    /// Start a thread
    #[command(alias = "add")]
    Create {
        /// Topic name, ID or ID prefix
        topic: String,
        /// Thread subject
        subject: String,
        /// First message
        #[arg(short, long)]
        message: Option<String>,
    },
    /// List threads in a topic
    #[command(alias = "ls")]
    List {
        /// Topic name, ID or ID prefix
        topic: String,
    },
    /// Show a thread with its messages
    Show {
        /// Thread ID (full UUID or prefix)
        thread: String,
    },
    /// Pin a thread to the top of its topic
    Sticky { thread: String },
    /// Unpin a thread
    Unsticky { thread: String },
    /// Change a thread's subject
    Rename { thread: String, subject: String },
    /// Delete a thread and its messages
    #[command(alias = "rm")]
    Delete {
        thread: String,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum MessageCommands {
    /// Show a message and its attachments
    Show {
        /// Message ID (full UUID or prefix)
        message: String,
    },
    /// Replace a message's text
    Edit { message: String, content: String },
    /// Delete a message
    #[command(alias = "rm")]
    Delete {
        message: String,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
    /// Attach a file to a message
    Attach {
        message: String,
        /// File to attach
        path: PathBuf,
        /// MIME type (guessed from the extension if omitted)
        #[arg(long)]
        mime_type: Option<String>,
    },
    /// Remove an attachment
    Detach {
        /// Attachment ID (full UUID)
        attachment: String,
    },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Set up sync on this device
    Init {
        /// Sync server URL
        #[arg(long)]
        server: Option<String>,
    },
    /// Log in to the sync server
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "BBS_PASSWORD", hide_env_values = true)]
        password: String,
        /// Recovery secret used to derive the encryption key
        #[arg(long, env = "BBS_SECRET", hide_env_values = true)]
        secret: String,
    },
    /// Forget the session tokens
    Logout,
    /// Push pending changes and pull new ones
    Now,
    /// Show sync state
    Status,
    /// List changes waiting to be pushed
    Pending,
    /// Discard pending changes and reset the watermark
    Wipe {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, server_url, auto_sync, log_file)
        key: String,
        /// Configuration value
        value: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config);

    let author = user_identity(cli.as_user.as_deref(), IDENTITY_SOURCE);

    // Commands that don't need the store
    match &cli.command {
        Commands::Config { command } => {
            return handle_config_command(command.clone(), config_path, &output);
        }
        Commands::Whoami => {
            commands::whoami::show(&author, &config, &output);
            return Ok(());
        }
        Commands::Sync {
            command: SyncCommands::Init { server },
        } => {
            return commands::sync::init(server.clone(), config_path, &output);
        }
        Commands::Sync {
            command:
                SyncCommands::Login {
                    email,
                    password,
                    secret,
                },
        } => {
            return commands::sync::login(
                email.clone(),
                password.clone(),
                secret.clone(),
                config_path,
                &output,
            );
        }
        Commands::Sync {
            command: SyncCommands::Logout,
        } => {
            return commands::sync::logout(config_path, &output);
        }
        _ => {}
    }

    let mut store = match Store::open_with_config(config) {
        Ok(store) => store,
        Err(e) => {
            if let Some(hint) = storage_hint(&e) {
                if !output.is_quiet() {
                    eprintln!("hint: {}", hint);
                }
            }
            return Err(e);
        }
    };
    if let Some(engine) = commands::sync::auto_push_engine(config_path) {
        store.set_auto_push(Box::new(engine));
    }

    match cli.command {
        Commands::Topic { command } => handle_topic_command(command, &mut store, &author, &output),
        Commands::Thread { command } => {
            handle_thread_command(command, &mut store, &author, &output)
        }
        Commands::Post { thread, content } => {
            commands::message::post(&mut store, thread, content, &author, &output)
        }
        Commands::Message { command } => handle_message_command(command, &mut store, &output),
        Commands::Sync { command } => handle_sync_command(command, &store, config_path, &output),
        Commands::Status => commands::status::show(&store, &output),
        Commands::Config { .. } | Commands::Whoami => unreachable!(), // Handled above
    }
}

fn handle_topic_command(
    command: TopicCommands,
    store: &mut Store,
    author: &str,
    output: &Output,
) -> Result<()> {
    match command {
        TopicCommands::Create { name, description } => {
            commands::topic::create(store, name, description, author, output)
        }
        TopicCommands::List { all } => commands::topic::list(store, all, output),
        TopicCommands::Show { topic } => commands::topic::show(store, topic, output),
        TopicCommands::Archive { topic } => {
            commands::topic::set_archived(store, topic, true, output)
        }
        TopicCommands::Unarchive { topic } => {
            commands::topic::set_archived(store, topic, false, output)
        }
        TopicCommands::Describe { topic, description } => {
            commands::topic::describe(store, topic, description, output)
        }
        TopicCommands::Delete { topic, force } => {
            commands::topic::delete(store, topic, force, output)
        }
    }
}

fn handle_thread_command(
    command: ThreadCommands,
    store: &mut Store,
    author: &str,
    output: &Output,
) -> Result<()> {
    match command {
        ThreadCommands::Create {
            topic,
            subject,
            message,
        } => commands::thread::create(store, topic, subject, message, author, output),
        ThreadCommands::List { topic } => commands::thread::list(store, topic, output),
        ThreadCommands::Show { thread } => commands::thread::show(store, thread, output),
        ThreadCommands::Sticky { thread } => {
            commands::thread::set_sticky(store, thread, true, output)
        }
        ThreadCommands::Unsticky { thread } => {
            commands::thread::set_sticky(store, thread, false, output)
        }
        ThreadCommands::Rename { thread, subject } => {
            commands::thread::rename(store, thread, subject, output)
        }
        ThreadCommands::Delete { thread, force } => {
            commands::thread::delete(store, thread, force, output)
        }
    }
}

fn handle_message_command(
    command: MessageCommands,
    store: &mut Store,
    output: &Output,
) -> Result<()> {
    match command {
        MessageCommands::Show { message } => commands::message::show(store, message, output),
        MessageCommands::Edit { message, content } => {
            commands::message::edit(store, message, content, output)
        }
        MessageCommands::Delete { message, force } => {
            commands::message::delete(store, message, force, output)
        }
        MessageCommands::Attach {
            message,
            path,
            mime_type,
        } => commands::message::attach(store, message, path, mime_type, output),
        MessageCommands::Detach { attachment } => {
            commands::message::detach(store, attachment, output)
        }
    }
}

fn handle_sync_command(
    command: SyncCommands,
    store: &Store,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        SyncCommands::Now => commands::sync::now(store, config_path, output),
        SyncCommands::Status => commands::sync::status(store, config_path, output),
        SyncCommands::Pending => commands::sync::pending(store, output),
        SyncCommands::Wipe { force } => commands::sync::wipe(store, force, output),
        // Handled before the store is opened
        SyncCommands::Init { .. } | SyncCommands::Login { .. } | SyncCommands::Logout => {
            unreachable!()
        }
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// What the user can do about a store that failed to open
fn storage_hint(err: &anyhow::Error) -> Option<String> {
    let storage = err.downcast_ref::<StorageError>()?;
    let suggestion = storage.recovery_suggestion()?;
    if storage.is_recoverable() {
        Some(format!("{} Then run the command again.", suggestion))
    } else {
        Some(suggestion.to_string())
    }
}

/// Initialize logging
///
/// Only initializes if BBS_LOG environment variable is set.
/// Logs to config.log_file when configured, otherwise to stderr.
fn init_logging(config: &Config) {
    let Ok(log_level) = std::env::var("BBS_LOG") else {
        return;
    };

    let env_filter = EnvFilter::new(format!("bbs_core={},bbs_cli={}", log_level, log_level));

    match config.log_file {
        Some(ref log_path) => {
            let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
                    return;
                }
            };
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(log_file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}
