//! Snapshot listeners: the watching side of the handoff

use super::handler::{ResultHandlerRegistry, SnapshotFileGuard};
use super::worker::AnalysisWorker;
use super::{SnapshotEnvelope, SnapshotMetadata, ANALYZER_PROCESS_ENV};
use crate::analyzer::LeakAnalyzer;
use crate::error::{LeakWatchError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Receives captured snapshots. Must not block the caller for long.
pub trait SnapshotListener: Send + Sync {
    fn on_snapshot_ready(&self, metadata: SnapshotMetadata);
}

/// Drops every snapshot, deleting its file
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSnapshotListener;

impl SnapshotListener for DiscardSnapshotListener {
    fn on_snapshot_ready(&self, metadata: SnapshotMetadata) {
        SnapshotFileGuard::new(metadata.snapshot_file).delete();
    }
}

/// Hands snapshots to an in-process [`AnalysisWorker`] thread
pub struct ThreadAnalysisListener {
    handler_name: String,
    worker: AnalysisWorker,
}

impl ThreadAnalysisListener {
    /// Fails with [`LeakWatchError::HandlerNotFound`] if `handler_name` is not
    /// registered.
    pub fn new(
        handler_name: &str,
        registry: ResultHandlerRegistry,
        analyzer: Arc<dyn LeakAnalyzer>,
    ) -> Result<Self> {
        registry.get(handler_name)?;
        let worker = AnalysisWorker::spawn(registry, analyzer)?;
        Ok(Self {
            handler_name: handler_name.to_string(),
            worker,
        })
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }
}

impl SnapshotListener for ThreadAnalysisListener {
    fn on_snapshot_ready(&self, metadata: SnapshotMetadata) {
        let path = metadata.snapshot_file.clone();
        let line = match SnapshotEnvelope::new(&self.handler_name, metadata).to_line() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize snapshot envelope: {}", e);
                SnapshotFileGuard::new(path).delete();
                return;
            }
        };

        if !self.worker.submit(line) {
            error!("Analysis worker stopped, discarding {}", path.display());
            SnapshotFileGuard::new(path).delete();
        }
    }
}

/// Starts a separate analysis process per snapshot and writes the envelope
/// to its stdin. The child runs with [`ANALYZER_PROCESS_ENV`] set so that
/// watchers it builds come out disabled.
pub struct ProcessAnalysisListener {
    program: PathBuf,
    args: Vec<String>,
    handler_name: String,
}

impl ProcessAnalysisListener {
    /// Fails with [`LeakWatchError::WorkerUnavailable`] if `program` does not
    /// exist.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, handler_name: &str) -> Result<Self> {
        let program = program.into();
        if !program.is_file() {
            return Err(LeakWatchError::WorkerUnavailable(format!(
                "worker program not found: {}",
                program.display()
            )));
        }
        Ok(Self {
            program,
            args,
            handler_name: handler_name.to_string(),
        })
    }

    /// Use the `leakwatch analyze` subcommand of the given binary
    pub fn leakwatch_binary(program: impl Into<PathBuf>, handler_name: &str) -> Result<Self> {
        Self::new(program, vec!["analyze".to_string()], handler_name)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn spawn_worker(&self, line: &str) -> std::io::Result<std::process::Child> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(ANALYZER_PROCESS_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = stdin
                .write_all(line.as_bytes())
                .and_then(|_| stdin.write_all(b"\n"));
            if let Err(e) = written {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        }
        Ok(child)
    }
}

impl SnapshotListener for ProcessAnalysisListener {
    fn on_snapshot_ready(&self, metadata: SnapshotMetadata) {
        let path = metadata.snapshot_file.clone();
        let key = metadata.reference_key.clone();
        let line = match SnapshotEnvelope::new(&self.handler_name, metadata).to_line() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize snapshot envelope: {}", e);
                SnapshotFileGuard::new(path).delete();
                return;
            }
        };

        let mut child = match self.spawn_worker(&line) {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start analysis process {}: {}", self.program.display(), e);
                SnapshotFileGuard::new(path).delete();
                return;
            }
        };

        info!(key = %key, pid = child.id(), "Started analysis process");
        // The child normally deletes the snapshot itself; whatever it leaves
        // behind once it exits is removed here.
        let reaper_path = path.clone();
        let reaper = std::thread::Builder::new()
            .name("LeakWatch-Reaper".to_string())
            .spawn(move || {
                match child.wait() {
                    Ok(status) if status.success() => {
                        debug!(key = %key, "Analysis process finished")
                    }
                    Ok(status) => warn!(key = %key, "Analysis process exited with {}", status),
                    Err(e) => warn!(key = %key, "Failed to wait for analysis process: {}", e),
                }
                if SnapshotFileGuard::new(reaper_path).delete() {
                    warn!(key = %key, "Analysis process left its snapshot behind");
                }
            });
        if let Err(e) = reaper {
            warn!("Failed to start reaper thread: {}", e);
            SnapshotFileGuard::new(path).delete();
        }
    }
}
