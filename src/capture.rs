//! Snapshot capture
//!
//! The capture collaborator writes a point-in-time snapshot to a file and
//! returns its path. A busy or failing capture answers
//! [`CaptureOutcome::RetryLater`]; that is an expected condition, not an error.

use crate::error::{LeakWatchError, Result};
use crate::watcher::{ProbeRecord, ReferenceQueue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a capture attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Snapshot written to this file; the caller now owns it
    Captured(PathBuf),
    /// Capture unavailable right now (e.g. one already in flight)
    RetryLater,
}

/// Captures a snapshot of the process
pub trait SnapshotCapture: Send + Sync {
    fn dump(&self) -> CaptureOutcome;
}

/// Never captures
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSnapshotCapture;

impl SnapshotCapture for NoopSnapshotCapture {
    fn dump(&self) -> CaptureOutcome {
        CaptureOutcome::RetryLater
    }
}

/// Snapshot document written by [`HeapSnapshotCapture`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapSnapshot {
    pub captured_at: DateTime<Utc>,
    pub pid: u32,
    pub entries: Vec<ProbeRecord>,
}

impl HeapSnapshot {
    pub fn read_from(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn entry(&self, key: &str) -> Option<&ProbeRecord> {
        self.entries.iter().find(|entry| entry.key == key)
    }
}

const SNAPSHOT_SUFFIX: &str = ".snapshot.json";

/// Directory holding snapshot files, bounded to `max_stored` entries
#[derive(Debug, Clone)]
pub struct SnapshotDirectory {
    dir: PathBuf,
    max_stored: usize,
}

impl SnapshotDirectory {
    pub const DEFAULT_MAX_STORED: usize = 7;

    pub fn new(dir: impl Into<PathBuf>, max_stored: usize) -> Result<Self> {
        if max_stored < 1 {
            return Err(LeakWatchError::InvalidArgument(
                "max_stored_snapshots must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            dir: dir.into(),
            max_stored,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Snapshot files currently stored, oldest first
    pub fn stored_snapshots(&self) -> std::io::Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(SNAPSHOT_SUFFIX))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Reserve a path for a new snapshot, evicting the oldest files so that at
    /// most `max_stored` exist once it is written.
    pub fn new_snapshot_file(&self) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let stored = self.stored_snapshots()?;
        let excess = (stored.len() + 1).saturating_sub(self.max_stored);
        for old in stored.iter().take(excess) {
            info!("Removing old snapshot {}", old.display());
            if let Err(e) = std::fs::remove_file(old) {
                warn!("Failed to remove old snapshot {}: {}", old.display(), e);
            }
        }

        let name = format!(
            "{}_{}{}",
            Utc::now().format("%Y%m%dT%H%M%S%.3f"),
            uuid::Uuid::new_v4().simple(),
            SNAPSHOT_SUFFIX
        );
        Ok(self.dir.join(name))
    }
}

/// Default capture: writes the probe inventory of the watcher's
/// [`ReferenceQueue`] as a [`HeapSnapshot`]. Only one capture runs at a time.
pub struct HeapSnapshotCapture {
    directory: SnapshotDirectory,
    queue: Arc<ReferenceQueue>,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl HeapSnapshotCapture {
    pub fn new(directory: SnapshotDirectory, queue: Arc<ReferenceQueue>) -> Self {
        Self {
            directory,
            queue,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn directory(&self) -> &SnapshotDirectory {
        &self.directory
    }

    fn write_snapshot(&self) -> Result<PathBuf> {
        let path = self.directory.new_snapshot_file()?;
        let snapshot = HeapSnapshot {
            captured_at: Utc::now(),
            pid: std::process::id(),
            entries: self.queue.inventory(),
        };

        let json = serde_json::to_vec(&snapshot)?;
        if let Err(e) = std::fs::write(&path, json) {
            let _ = std::fs::remove_file(&path);
            return Err(e.into());
        }
        Ok(path)
    }
}

impl SnapshotCapture for HeapSnapshotCapture {
    fn dump(&self) -> CaptureOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Snapshot capture already in flight");
            return CaptureOutcome::RetryLater;
        }
        let _guard = InFlight(&self.in_flight);

        match self.write_snapshot() {
            Ok(path) => {
                debug!("Snapshot written to {}", path.display());
                CaptureOutcome::Captured(path)
            }
            Err(e) => {
                warn!("Could not capture snapshot: {}", e);
                CaptureOutcome::RetryLater
            }
        }
    }
}
