//! BBS Core Library
//!
//! This crate provides the core functionality for BBS, a local-first
//! message board (topics, threads, messages, attachments) shared by humans
//! and agents, with optional encrypted replication across devices.
//!
//! # Architecture
//!
//! - **SQLite**: Authoritative local state, plus the outbox and watermark
//! - **Remote log**: Append-only, server-sequenced log of sealed Changes
//!
//! Every local mutation queues a Change. The sync engine pushes the queue
//! and pulls what other devices wrote.
//!
//! # Quick Start
//!
//! ```text
//! let mut store = Store::open()?;
//!
//! let (topic, _) = store.create_topic("general", "", "alice@cli")?;
//! let (thread, _) = store.create_thread(topic.id, "Hello", "alice@cli")?;
//! store.create_message(thread.id, "hi", "alice@cli")?;
//!
//! let thread = resolve_thread(&store, "3f2a")?;
//! ```
//!
//! # Modules
//!
//! - `store`: Local board storage (main entry point)
//! - `models`: Topics, threads, messages and attachments
//! - `resolve`: Full id, name and prefix lookup
//! - `sync`: Outbox, apply layer, sessions and the sync engine
//! - `vault`: Payload sealing
//! - `storage`: Schema and storage errors
//! - `config`: Application configuration
//! - `identity`: Author and device identity

pub mod config;
pub mod identity;
pub mod models;
pub mod resolve;
pub mod storage;
pub mod store;
pub mod sync;
pub mod vault;

pub use config::{Config, SyncSettings};
pub use identity::{parse_identity, user_identity, Identity, InitResult};
pub use models::{Attachment, Message, Thread, Topic};
pub use resolve::{resolve_message, resolve_thread, resolve_topic, ResolveError};
pub use storage::{StorageError, StorageResult};
pub use store::{BoardCounts, Store};
pub use sync::{EnqueueOutcome, SyncEngine, SyncError, SyncReport};
pub use vault::{AesGcmVault, Vault, VaultError};
