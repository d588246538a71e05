//! Sync lifecycle observers

use super::engine::SyncReport;

/// Receives progress notifications during a sync round
///
/// Every method has a no-op default; implement only what you need.
pub trait SyncListener {
    fn on_start(&mut self) {}

    /// After each pushed batch
    fn on_push_progress(&mut self, _pushed: usize, _remaining: usize) {}

    /// After each pulled Change is handled
    fn on_pull_progress(&mut self, _handled: usize, _sequence: i64) {}

    fn on_complete(&mut self, _report: &SyncReport) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl SyncListener for NoopListener {}
