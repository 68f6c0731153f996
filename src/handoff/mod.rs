//! Handoff of captured snapshots to analysis
//!
//! The watching side ([`SnapshotListener`]) packs a [`SnapshotMetadata`] into a
//! [`SnapshotEnvelope`] and hands it to a worker running on its own thread or
//! in a child process. The worker analyzes the snapshot, passes the result to
//! the named [`ResultHandler`] and deletes the snapshot file.

mod handler;
mod listener;
mod metadata;
mod worker;

pub use handler::{
    deliver_result, DiscardResultHandler, LogResultHandler, ResultHandler,
    ResultHandlerRegistry, SnapshotFileGuard,
};
pub use listener::{
    DiscardSnapshotListener, ProcessAnalysisListener, SnapshotListener, ThreadAnalysisListener,
};
pub use metadata::{AnalysisResult, SnapshotEnvelope, SnapshotMetadata, ENVELOPE_VERSION};
pub use worker::{process_envelope, process_line, run_worker, AnalysisWorker, ANALYZER_THREAD_NAME};

/// Set in the environment of analysis child processes
pub const ANALYZER_PROCESS_ENV: &str = "LEAKWATCH_ANALYZER_PROCESS";

/// Whether this process was started as an analysis worker
pub fn is_in_analyzer_process() -> bool {
    std::env::var(ANALYZER_PROCESS_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
