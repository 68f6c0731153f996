//! Watch statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Counters updated by the liveness check (thread-safe, cheap to clone)
#[derive(Clone, Default)]
pub struct WatchStats {
    /// Objects registered through `watch()`
    pub watched: Arc<AtomicU64>,

    /// Keys removed because a drain saw the object collected
    pub collected: Arc<AtomicU64>,

    /// Checks that returned `Retry`
    pub retries: Arc<AtomicU64>,

    /// Collector passes requested
    pub gc_passes: Arc<AtomicU64>,

    /// Snapshots written
    pub captures: Arc<AtomicU64>,

    /// Capture attempts answered with `RetryLater`
    pub capture_retries: Arc<AtomicU64>,

    /// Snapshots handed to the listener
    pub dispatched: Arc<AtomicU64>,
}

/// Point-in-time copy of [`WatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchStatsSnapshot {
    pub watched: u64,
    pub collected: u64,
    pub retries: u64,
    pub gc_passes: u64,
    pub captures: u64,
    pub capture_retries: u64,
    pub dispatched: u64,
}

impl WatchStatsSnapshot {
    /// Watched objects neither collected nor dispatched yet
    pub fn outstanding(&self) -> u64 {
        self.watched
            .saturating_sub(self.collected)
            .saturating_sub(self.dispatched)
    }
}

impl WatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_watch(&self) {
        self.watched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_collected(&self) {
        self.collected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gc_pass(&self) {
        self.gc_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_capture(&self) {
        self.captures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_capture_retry(&self) {
        self.capture_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WatchStatsSnapshot {
        WatchStatsSnapshot {
            watched: self.watched.load(Ordering::Relaxed),
            collected: self.collected.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            gc_passes: self.gc_passes.load(Ordering::Relaxed),
            captures: self.captures.load(Ordering::Relaxed),
            capture_retries: self.capture_retries.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
        }
    }

    pub fn log_statistics(&self) {
        let snapshot = self.snapshot();
        info!(
            watched = snapshot.watched,
            collected = snapshot.collected,
            outstanding = snapshot.outstanding(),
            retries = snapshot.retries,
            gc_passes = snapshot.gc_passes,
            captures = snapshot.captures,
            capture_retries = snapshot.capture_retries,
            dispatched = snapshot.dispatched,
            "Leak watch statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = WatchStats::new();
        stats.record_watch();
        stats.record_watch();
        stats.record_watch();
        stats.record_collected();
        stats.record_dispatch();
        stats.record_retry();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.watched, 3);
        assert_eq!(snapshot.collected, 1);
        assert_eq!(snapshot.dispatched, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.outstanding(), 1);
    }

    #[test]
    fn test_clones_share_counters() {
        let stats = WatchStats::new();
        let clone = stats.clone();
        clone.record_gc_pass();
        clone.record_capture();
        clone.record_capture_retry();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.gc_passes, 1);
        assert_eq!(snapshot.captures, 1);
        assert_eq!(snapshot.capture_retries, 1);
    }
}
