//! Common test utilities and helpers

#![allow(dead_code)]

use leakwatch_core::{AnalysisResult, ResultHandlerRegistry, SnapshotMetadata, WatchConfig};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub type Delivery = (SnapshotMetadata, AnalysisResult);

/// Registry with the builtins plus a `collect` handler that forwards every
/// delivery to the returned receiver
pub fn collecting_registry() -> (ResultHandlerRegistry, Receiver<Delivery>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    let mut registry = ResultHandlerRegistry::with_builtins();
    registry.register(
        "collect",
        move |metadata: &SnapshotMetadata, result: &AnalysisResult| -> anyhow::Result<()> {
            // The file must still exist while the handler runs.
            assert!(metadata.snapshot_file.exists());
            tx.lock()
                .unwrap()
                .send((metadata.clone(), result.clone()))?;
            Ok(())
        },
    );
    (registry, rx)
}

/// Config writing snapshots under `dir` with a short watch delay
pub fn test_config(dir: &Path, delay_ms: u64) -> WatchConfig {
    WatchConfig {
        watch_delay: Duration::from_millis(delay_ms),
        snapshot_dir: Some(dir.to_path_buf()),
        result_handler: "collect".to_string(),
        ..WatchConfig::default()
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Snapshot files currently in `dir`
pub fn snapshot_files(dir: &Path) -> Vec<std::path::PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.to_string_lossy().ends_with(".snapshot.json"))
            .collect(),
        Err(_) => Vec::new(),
    }
}
