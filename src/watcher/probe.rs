//! Weak liveness probes and the queue that reports them collected

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Non-owning handle to a watched object, tagged with a unique key
pub struct LivenessProbe {
    key: String,
    name: String,
    type_name: &'static str,
    shallow_size: usize,
    target: Weak<dyn Any + Send + Sync>,
}

impl LivenessProbe {
    pub fn new<T>(key: String, name: &str, target: Weak<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self {
            key,
            name: name.to_string(),
            type_name: std::any::type_name::<T>(),
            shallow_size: std::mem::size_of::<T>(),
            target,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn shallow_size(&self) -> usize {
        self.shallow_size
    }

    /// Whether a strong reference to the target still exists
    pub fn is_reachable(&self) -> bool {
        self.target.strong_count() > 0
    }

    fn record(&self) -> ProbeRecord {
        ProbeRecord {
            key: self.key.clone(),
            name: self.name.clone(),
            type_name: self.type_name.to_string(),
            shallow_size: self.shallow_size as u64,
            alive: self.is_reachable(),
        }
    }
}

impl std::fmt::Debug for LivenessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessProbe")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("reachable", &self.is_reachable())
            .finish()
    }
}

/// Point-in-time description of a registered probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub key: String,
    pub name: String,
    pub type_name: String,
    pub shallow_size: u64,
    pub alive: bool,
}

#[derive(Default)]
struct QueueState {
    registered: Vec<Arc<LivenessProbe>>,
    enqueued: VecDeque<Arc<LivenessProbe>>,
}

/// Collection-notification queue.
///
/// Probes are registered at watch time. A sweep moves every probe whose target
/// has lost its last strong reference from the registrations to the queue. A
/// probe is enqueued at most once.
#[derive(Default)]
pub struct ReferenceQueue {
    state: Mutex<QueueState>,
}

impl ReferenceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, probe: Arc<LivenessProbe>) {
        self.lock().registered.push(probe);
    }

    /// Remove and return the next probe whose target is weakly reachable.
    /// Sweeps only when nothing is already enqueued.
    pub fn poll(&self) -> Option<Arc<LivenessProbe>> {
        let mut state = self.lock();
        if state.enqueued.is_empty() {
            Self::sweep(&mut state);
        }
        state.enqueued.pop_front()
    }

    /// Sweep once and remove every enqueued probe
    pub fn drain(&self) -> Vec<Arc<LivenessProbe>> {
        let mut state = self.lock();
        Self::sweep(&mut state);
        state.enqueued.drain(..).collect()
    }

    /// Probes registered and not yet handed out by [`ReferenceQueue::poll`]
    pub fn inventory(&self) -> Vec<ProbeRecord> {
        let state = self.lock();
        state
            .registered
            .iter()
            .chain(state.enqueued.iter())
            .map(|probe| probe.record())
            .collect()
    }

    /// Number of probes whose targets are still reachable
    pub fn pending(&self) -> usize {
        let mut state = self.lock();
        Self::sweep(&mut state);
        state.registered.len()
    }

    fn sweep(state: &mut QueueState) {
        let QueueState {
            registered,
            enqueued,
        } = state;
        registered.retain(|probe| {
            if probe.is_reachable() {
                true
            } else {
                enqueued.push_back(probe.clone());
                false
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
