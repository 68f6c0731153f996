//! Leak watcher
//!
//! `watch()` tags an object with a key and schedules a liveness check on the
//! [`WatchExecutor`]. The check drains the reference queue, applies collector
//! pressure if the key is still retained and, if that does not help either,
//! captures a snapshot and hands it to the [`SnapshotListener`].

use super::{LivenessProbe, ReferenceQueue, RetainedKeySet};
use crate::capture::{CaptureOutcome, SnapshotCapture};
use crate::debugger::DebuggerControl;
use crate::diagnostics::{WatchStats, WatchStatsSnapshot};
use crate::error::{LeakWatchError, Result};
use crate::exclusion::ExclusionPolicy;
use crate::executor::{RetryOutcome, WatchExecutor};
use crate::gc::GcTrigger;
use crate::handoff::{SnapshotListener, SnapshotMetadata};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Collaborators a watcher is assembled from
pub(crate) struct WatcherParts {
    pub queue: Arc<ReferenceQueue>,
    pub executor: Arc<dyn WatchExecutor>,
    pub capture: Arc<dyn SnapshotCapture>,
    pub gc: Arc<dyn GcTrigger>,
    pub debugger: Arc<dyn DebuggerControl>,
    pub listener: Arc<dyn SnapshotListener>,
    pub exclusion_policy: ExclusionPolicy,
}

struct WatcherInner {
    retained: RetainedKeySet,
    queue: Arc<ReferenceQueue>,
    executor: Arc<dyn WatchExecutor>,
    capture: Arc<dyn SnapshotCapture>,
    gc: Arc<dyn GcTrigger>,
    debugger: Arc<dyn DebuggerControl>,
    listener: Arc<dyn SnapshotListener>,
    exclusion_policy: ExclusionPolicy,
    stats: WatchStats,
}

/// Watches objects that are expected to be released soon.
///
/// Cheap to clone; clones share state. A disabled watcher accepts every call
/// and does nothing.
#[derive(Clone)]
pub struct LeakWatcher {
    inner: Option<Arc<WatcherInner>>,
}

impl LeakWatcher {
    pub(crate) fn from_parts(parts: WatcherParts) -> Self {
        Self {
            inner: Some(Arc::new(WatcherInner {
                retained: RetainedKeySet::new(),
                queue: parts.queue,
                executor: parts.executor,
                capture: parts.capture,
                gc: parts.gc,
                debugger: parts.debugger,
                listener: parts.listener,
                exclusion_policy: parts.exclusion_policy,
                stats: WatchStats::new(),
            })),
        }
    }

    /// A watcher that ignores everything
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.is_none()
    }

    /// Watch `target`, expecting it to be released. Non-blocking.
    pub fn watch<T>(&self, target: &Arc<T>, name: &str) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        if self.is_disabled() {
            return Ok(());
        }
        self.watch_weak(Arc::downgrade(target), name)
    }

    /// Watch through an existing weak handle.
    ///
    /// Fails with [`LeakWatchError::InvalidArgument`] if the handle no longer
    /// points at a live object.
    pub fn watch_weak<T>(&self, target: Weak<T>, name: &str) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        if target.strong_count() == 0 {
            return Err(LeakWatchError::InvalidArgument(
                "watched reference must point at a live object".to_string(),
            ));
        }

        let watch_start = Instant::now();
        let key = Uuid::new_v4().to_string();
        inner.retained.insert(key.clone());
        let probe = Arc::new(LivenessProbe::new(key, name, target));
        inner.queue.register(probe.clone());
        inner.stats.record_watch();
        debug!(key = probe.key(), name, "Watching {}", probe.type_name());

        let watcher = inner.clone();
        inner
            .executor
            .execute(Box::new(move || watcher.ensure_gone(&probe, watch_start)));
        Ok(())
    }

    /// Run one liveness check for `probe`. Called by the executor; returns
    /// `Retry` when the check could not reach a verdict.
    pub fn ensure_gone(&self, probe: &LivenessProbe, watch_start: Instant) -> RetryOutcome {
        match &self.inner {
            Some(inner) => inner.ensure_gone(probe, watch_start),
            None => RetryOutcome::Done,
        }
    }

    /// Keys of objects not yet observed collected
    pub fn retained_keys(&self) -> Vec<String> {
        self.inner
            .as_ref()
            .map(|inner| inner.retained.keys())
            .unwrap_or_default()
    }

    pub fn is_retained(&self, key: &str) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.retained.contains(key))
    }

    pub fn stats(&self) -> WatchStatsSnapshot {
        self.inner
            .as_ref()
            .map(|inner| inner.stats.snapshot())
            .unwrap_or_default()
    }

    pub fn log_statistics(&self) {
        if let Some(inner) = &self.inner {
            inner.stats.log_statistics();
        }
    }

    pub fn exclusion_policy(&self) -> Option<&ExclusionPolicy> {
        self.inner.as_ref().map(|inner| &inner.exclusion_policy)
    }
}

impl std::fmt::Debug for LeakWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("LeakWatcher")
                .field("retained", &inner.retained.len())
                .field("stats", &inner.stats.snapshot())
                .finish(),
            None => f.write_str("LeakWatcher(disabled)"),
        }
    }
}

impl WatcherInner {
    fn ensure_gone(&self, probe: &LivenessProbe, watch_start: Instant) -> RetryOutcome {
        let gc_start = Instant::now();
        let watch_duration = gc_start.saturating_duration_since(watch_start);

        self.remove_weakly_reachable();

        if self.debugger.is_debugger_attached() {
            debug!(key = probe.key(), "Debugger attached, checking again later");
            self.stats.record_retry();
            return RetryOutcome::Retry;
        }
        if self.gone(probe) {
            return RetryOutcome::Done;
        }

        self.gc.run_gc();
        self.stats.record_gc_pass();
        self.remove_weakly_reachable();
        if self.gone(probe) {
            return RetryOutcome::Done;
        }

        let capture_start = Instant::now();
        let gc_duration = capture_start.saturating_duration_since(gc_start);
        let snapshot_file = match self.capture.dump() {
            CaptureOutcome::Captured(path) => path,
            CaptureOutcome::RetryLater => {
                debug!(key = probe.key(), "Snapshot capture unavailable, checking again later");
                self.stats.record_capture_retry();
                self.stats.record_retry();
                return RetryOutcome::Retry;
            }
        };
        let capture_duration = capture_start.elapsed();
        self.stats.record_capture();

        warn!(
            key = probe.key(),
            name = probe.name(),
            type_name = probe.type_name(),
            watch_ms = as_millis(watch_duration),
            "Object still retained after collection, snapshot at {}",
            snapshot_file.display()
        );

        self.listener.on_snapshot_ready(SnapshotMetadata {
            snapshot_file,
            reference_key: probe.key().to_string(),
            reference_name: probe.name().to_string(),
            exclusion_policy: self.exclusion_policy.clone(),
            watch_duration_ms: as_millis(watch_duration),
            gc_duration_ms: as_millis(gc_duration),
            capture_duration_ms: as_millis(capture_duration),
        });
        self.stats.record_dispatch();
        info!(key = probe.key(), "Snapshot handed off for analysis");
        RetryOutcome::Done
    }

    fn gone(&self, probe: &LivenessProbe) -> bool {
        !self.retained.contains(probe.key())
    }

    fn remove_weakly_reachable(&self) {
        for probe in self.queue.drain() {
            if self.retained.remove(probe.key()) {
                trace!(key = probe.key(), "Watched object collected");
                self.stats.record_collected();
            }
        }
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
