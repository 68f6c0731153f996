//! Diagnostic counters for a running watcher
//!
//! Every [`crate::LeakWatcher`] owns one [`WatchStats`]; call
//! [`WatchStats::log_statistics`] to get a summary of what it has done so far.

pub mod stats;

pub use stats::{WatchStats, WatchStatsSnapshot};
