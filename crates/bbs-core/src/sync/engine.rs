//! Sync engine
//!
//! One round pushes the outbox, then pulls everything above the watermark:
//!
//! 1. Take the oldest batch from the outbox, seal it and upload it
//! 2. Remove only what the server acknowledged; repeat until empty
//! 3. Fetch remote Changes above the watermark, page by page
//! 4. Open, apply and advance the watermark one Change at a time
//!
//! Cancellation is checked between batches and between Changes. Whatever
//! was done before the flag was raised stays done, so the next round picks
//! up where this one stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::apply::{apply_change, ApplyError, ApplyOutcome};
use super::change::{Change, OutgoingChange, RemoteChange};
use super::error::SyncError;
use super::listener::{NoopListener, SyncListener};
use super::outbox::Outbox;
use super::remote::{RemoteError, RemoteLog};
use super::session::Session;
use crate::vault::Vault;

/// Default number of Changes per push batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default number of Changes per pull page
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Shared flag to stop a round between steps
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A remote Change that was not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedChange {
    pub sequence: i64,
    pub reason: String,
}

impl SkippedChange {
    pub fn to_error(&self) -> SyncError {
        SyncError::DataIntegrity {
            sequence: self.sequence,
            reason: self.reason.clone(),
        }
    }
}

/// Outcome of one sync round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Local Changes the server acknowledged
    pub pushed: usize,
    /// Remote Changes applied to the store
    pub applied: usize,
    /// Remote Changes of unknown kinds
    pub ignored: usize,
    pub skipped: Vec<SkippedChange>,
    /// Watermark after the round
    pub watermark: i64,
    pub cancelled: bool,
}

/// Pushes pending Changes right after a local mutation
pub trait AutoPush {
    fn push_pending(&mut self, conn: &Connection) -> Result<usize, SyncError>;
}

/// Orchestrates push and pull against a remote log
pub struct SyncEngine<R: RemoteLog> {
    remote: R,
    session: Session,
    listener: Box<dyn SyncListener>,
    cancel: CancelFlag,
    batch_size: usize,
    page_size: usize,
}

impl<R: RemoteLog> SyncEngine<R> {
    pub fn new(remote: R, session: Session) -> Self {
        Self {
            remote,
            session,
            listener: Box::new(NoopListener),
            cancel: CancelFlag::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_listener(mut self, listener: Box<dyn SyncListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run a full round: push the outbox, then pull
    pub fn sync(&mut self, conn: &Connection) -> Result<SyncReport, SyncError> {
        self.ensure_configured()?;
        info!("Starting sync round");
        self.listener.on_start();

        let vault = self.session.vault()?;
        let mut report = SyncReport::default();

        self.push_with(conn, &vault, &mut report)?;
        if !report.cancelled {
            self.pull_with(conn, &vault, &mut report)?;
        }
        report.watermark = Outbox::new(conn).watermark()?;

        info!(
            pushed = report.pushed,
            applied = report.applied,
            skipped = report.skipped.len(),
            watermark = report.watermark,
            cancelled = report.cancelled,
            "Sync round finished"
        );
        self.listener.on_complete(&report);
        Ok(report)
    }

    /// Push only, leaving the watermark alone
    pub fn push(&mut self, conn: &Connection) -> Result<SyncReport, SyncError> {
        self.ensure_configured()?;
        let vault = self.session.vault()?;
        let mut report = SyncReport::default();
        self.push_with(conn, &vault, &mut report)?;
        report.watermark = Outbox::new(conn).watermark()?;
        Ok(report)
    }

    fn ensure_configured(&self) -> Result<(), SyncError> {
        if self.session.config().sync.server_url.is_none() {
            return Err(SyncError::NotConfigured("no server URL".into()));
        }
        self.session.device_id()?;
        Ok(())
    }

    fn push_with(
        &mut self,
        conn: &Connection,
        vault: &dyn Vault,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let outbox = Outbox::new(conn);
        let device_id = self.session.device_id()?;

        loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let batch = outbox.oldest(self.batch_size)?;
            if batch.is_empty() {
                break;
            }

            let outgoing = batch
                .iter()
                .map(|change| seal(vault, change))
                .collect::<Result<Vec<_>, _>>()?;

            let accepted = self.authorized(|remote, token| remote.push(token, &device_id, &outgoing))?;
            let ids: Vec<String> = accepted
                .into_iter()
                .filter(|a| batch.iter().any(|c| c.id == a.change_id))
                .map(|a| a.change_id)
                .collect();

            let removed = outbox.remove(&ids)?;
            report.pushed += removed;
            let remaining = outbox.pending_count()?;
            debug!(removed, remaining, "Pushed batch");
            self.listener.on_push_progress(report.pushed, remaining);

            if removed == 0 {
                warn!("Server accepted none of {} changes", batch.len());
                break;
            }
        }
        Ok(())
    }

    fn pull_with(
        &mut self,
        conn: &Connection,
        vault: &dyn Vault,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let mut cursor = Outbox::new(conn).watermark()?;
        let mut handled = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }

            let page_size = self.page_size;
            let mut page = self.authorized(|remote, token| remote.pull(token, cursor, page_size))?;
            if page.is_empty() {
                return Ok(());
            }
            let full_page = page.len() >= page_size;
            page.sort_by_key(|c| c.sequence);

            for change in page {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(());
                }
                if change.sequence <= cursor {
                    continue;
                }
                cursor = change.sequence;

                match apply_one(conn, vault, &change)? {
                    Ok(ApplyOutcome::Applied) => report.applied += 1,
                    Ok(ApplyOutcome::Ignored) => report.ignored += 1,
                    Err(reason) => {
                        let skipped = SkippedChange {
                            sequence: change.sequence,
                            reason,
                        };
                        warn!("{}", skipped.to_error());
                        report.skipped.push(skipped);
                    }
                }
                handled += 1;
                self.listener.on_pull_progress(handled, change.sequence);
            }

            if !full_page {
                return Ok(());
            }
        }
    }

    /// Call the remote with a valid access token, refreshing once on 401
    fn authorized<T>(
        &mut self,
        call: impl Fn(&R, &str) -> Result<T, RemoteError>,
    ) -> Result<T, SyncError> {
        let token = self.session.access_token(&self.remote)?;
        match call(&self.remote, &token) {
            Err(RemoteError::Unauthorized) => {
                debug!("Access token rejected, refreshing");
                let token = self.session.refresh(&self.remote)?;
                Ok(call(&self.remote, &token)?)
            }
            other => Ok(other?),
        }
    }
}

impl<R: RemoteLog> AutoPush for SyncEngine<R> {
    fn push_pending(&mut self, conn: &Connection) -> Result<usize, SyncError> {
        Ok(self.push(conn)?.pushed)
    }
}

fn seal(vault: &dyn Vault, change: &Change) -> Result<OutgoingChange, SyncError> {
    let payload = match &change.payload {
        Some(json) => vault.seal(json.as_bytes())?,
        None => Vec::new(),
    };
    Ok(OutgoingChange {
        change_id: change.id.clone(),
        entity: change.entity,
        entity_id: change.entity_id.to_string(),
        op: change.op,
        payload,
    })
}

/// Open and apply one Change, advancing the watermark in the same transaction
///
/// The outer result is a storage failure that ends the round; the inner one
/// is a per-Change skip reason.
fn apply_one(
    conn: &Connection,
    vault: &dyn Vault,
    change: &RemoteChange,
) -> Result<Result<ApplyOutcome, String>, SyncError> {
    if let Some(reason) = &change.decode_error {
        return Ok(Err(reason.clone()));
    }
    let opened = if change.payload.is_empty() {
        change.clone()
    } else {
        match vault.open(&change.payload) {
            Ok(plaintext) => change.with_payload(plaintext),
            Err(e) => return Ok(Err(e.to_string())),
        }
    };

    let tx = conn.unchecked_transaction()?;
    let outcome = match apply_change(&tx, &opened) {
        Ok(outcome) => outcome,
        Err(ApplyError::Integrity(reason)) => return Ok(Err(reason)),
        Err(ApplyError::Storage(e)) => return Err(e.into()),
    };
    Outbox::new(&tx).advance_watermark(change.sequence)?;
    tx.commit()?;
    Ok(Ok(outcome))
}
