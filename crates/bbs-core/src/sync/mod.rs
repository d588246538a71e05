//! Replication with the remote change log
//!
//! Local mutations are queued in the outbox as Changes. A sync round pushes
//! them to the server, which assigns each a global sequence number, then
//! pulls every Change above the local watermark and applies it.
//!
//! ## Usage
//!
//! ```ignore
//! let remote = HttpRemote::new(server_url)?;
//! let session = Session::new(config, Config::config_file_path());
//! let mut engine = SyncEngine::new(remote, session);
//! let report = engine.sync(store.connection())?;
//! ```

pub mod apply;
pub mod change;
pub mod engine;
pub mod error;
pub mod http;
pub mod listener;
pub mod outbox;
pub mod remote;
pub mod session;

#[cfg(test)]
pub(crate) mod fake;

pub use apply::{apply_change, ApplyError, ApplyOutcome};
pub use change::{Change, EnqueueOutcome, EntityKind, Op, OutgoingChange, RemoteChange};
pub use engine::{
    AutoPush, CancelFlag, SkippedChange, SyncEngine, SyncReport, DEFAULT_BATCH_SIZE,
    DEFAULT_PAGE_SIZE,
};
pub use error::SyncError;
pub use http::HttpRemote;
pub use listener::{NoopListener, SyncListener};
pub use outbox::Outbox;
pub use remote::{Accepted, RemoteError, RemoteLog, TokenGrant};
pub use session::Session;
