//! Leak watching: probes, the retained key set and the liveness check

mod leak_watcher;
mod probe;
mod retained;

pub(crate) use leak_watcher::WatcherParts;
pub use leak_watcher::LeakWatcher;
pub use probe::{LivenessProbe, ProbeRecord, ReferenceQueue};
pub use retained::RetainedKeySet;
