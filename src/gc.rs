//! Collector pressure
//!
//! Rust has no tracing collector, so "running a GC" means asking the host to
//! release whatever it holds on to lazily (deferred-drop queues, epoch-based
//! reclamation, caches) and giving other threads a moment to finish drops that
//! are already in flight.

use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Best-effort request to release unreachable objects
pub trait GcTrigger: Send + Sync {
    fn run_gc(&self);
}

/// Does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGcTrigger;

impl GcTrigger for NoopGcTrigger {
    fn run_gc(&self) {}
}

type ReclaimHook = Arc<dyn Fn() + Send + Sync>;

/// Runs the registered reclaim hooks, then yields and sleeps for `settle` so
/// that references dropped on other threads become visible.
#[derive(Clone)]
pub struct DefaultGcTrigger {
    hooks: Vec<ReclaimHook>,
    settle: Duration,
}

impl DefaultGcTrigger {
    pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        Self {
            hooks: Vec::new(),
            settle: Self::DEFAULT_SETTLE,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Add a hook that releases host-held references, run on every pass
    pub fn with_reclaim_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
        self
    }
}

impl Default for DefaultGcTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl GcTrigger for DefaultGcTrigger {
    fn run_gc(&self) {
        trace!(hooks = self.hooks.len(), "Running reclaim pass");
        for hook in &self.hooks {
            hook();
        }
        std::thread::yield_now();
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
    }
}
