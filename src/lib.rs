//! LeakWatch - leak watching for `Arc`-managed objects
//!
//! Tell a [`LeakWatcher`] about an object you expect to be released soon. A
//! few seconds later, once the main loop is idle, a background check looks at
//! whether the object is gone. If it is still alive after collector pressure,
//! a snapshot is captured and handed to an analysis worker, which reports the
//! result to a named [`ResultHandler`](handoff::ResultHandler).
//!
//! # Architecture
//!
//! - **Watcher**: liveness probes, the retained key set and the check itself
//! - **Executor**: idle-driven scheduling with exponential backoff
//! - **Handoff**: snapshot metadata, the envelope wire format, analysis workers
//! - **Collaborators**: capture, GC trigger, debugger detection, exclusions
//!
//! # Example
//!
//! ```no_run
//! use leakwatch_core::{LeakWatcherBuilder, WatchConfig};
//! use std::sync::Arc;
//!
//! fn main() -> leakwatch_core::Result<()> {
//!     let watcher = LeakWatcherBuilder::from_config(WatchConfig::from_env()?).build()?;
//!
//!     let session = Arc::new(String::from("closed session"));
//!     watcher.watch(&session, "session")?;
//!     drop(session);
//!
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod builder;
pub mod capture;
pub mod config;
pub mod debugger;
pub mod diagnostics;
pub mod error;
pub mod exclusion;
pub mod executor;
pub mod gc;
pub mod handoff;
pub mod watcher;

// Re-export commonly used types
pub use analyzer::{HeapSnapshotAnalyzer, LeakAnalyzer};
pub use builder::{BuilderDefaults, LeakWatcherBuilder, NoopDefaults, PlatformDefaults};
pub use capture::{CaptureOutcome, HeapSnapshot, SnapshotCapture, SnapshotDirectory};
pub use config::{AnalysisMode, WatchConfig};
pub use diagnostics::{WatchStats, WatchStatsSnapshot};
pub use error::{LeakWatchError, Result};
pub use exclusion::{ExclusionKind, ExclusionPolicy, ExclusionRule};
pub use executor::{RetryOutcome, Retryable, WatchExecutor};
pub use handoff::{
    AnalysisResult, ResultHandler, ResultHandlerRegistry, SnapshotEnvelope, SnapshotListener,
    SnapshotMetadata,
};
pub use watcher::LeakWatcher;
