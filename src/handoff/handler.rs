//! Result handlers and snapshot file ownership
//!
//! A result handler is the final consumer of an analysis. Whatever the handler
//! does, returns, or panics with, the snapshot file is deleted exactly once
//! after it returns.

use super::{AnalysisResult, SnapshotMetadata};
use crate::error::{LeakWatchError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Receives the outcome of each analysis.
///
/// Runs on the analysis worker; blocking here (e.g. to upload the snapshot) is
/// fine. The snapshot file is deleted right after this returns.
pub trait ResultHandler: Send + Sync {
    fn on_snapshot_analyzed(
        &self,
        metadata: &SnapshotMetadata,
        result: &AnalysisResult,
    ) -> anyhow::Result<()>;
}

impl<F> ResultHandler for F
where
    F: Fn(&SnapshotMetadata, &AnalysisResult) -> anyhow::Result<()> + Send + Sync,
{
    fn on_snapshot_analyzed(
        &self,
        metadata: &SnapshotMetadata,
        result: &AnalysisResult,
    ) -> anyhow::Result<()> {
        self(metadata, result)
    }
}

/// Reports analyses through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogResultHandler;

impl ResultHandler for LogResultHandler {
    fn on_snapshot_analyzed(
        &self,
        metadata: &SnapshotMetadata,
        result: &AnalysisResult,
    ) -> anyhow::Result<()> {
        let key = metadata.reference_key.as_str();
        let name = metadata.reference_name.as_str();

        if let Some(failure) = &result.failure {
            error!(key, name, "Leak analysis failed: {}", failure);
        } else if result.leak_found && result.excluded_leak {
            info!(
                key,
                name,
                class = result.class_name.as_deref().unwrap_or("?"),
                "Excluded leak"
            );
        } else if result.leak_found {
            warn!(
                key,
                name,
                class = result.class_name.as_deref().unwrap_or("?"),
                watch_ms = metadata.watch_duration_ms,
                gc_ms = metadata.gc_duration_ms,
                capture_ms = metadata.capture_duration_ms,
                analysis_ms = result.analysis_duration_ms,
                "Leak detected"
            );
            for line in &result.leak_trace {
                warn!("  {}", line);
            }
        } else {
            info!(key, name, "No leak found");
        }
        Ok(())
    }
}

/// Ignores every result
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardResultHandler;

impl ResultHandler for DiscardResultHandler {
    fn on_snapshot_analyzed(
        &self,
        _metadata: &SnapshotMetadata,
        _result: &AnalysisResult,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Result handlers addressable by name across the analysis boundary
#[derive(Clone, Default)]
pub struct ResultHandlerRegistry {
    handlers: HashMap<String, Arc<dyn ResultHandler>>,
}

impl ResultHandlerRegistry {
    pub const LOG: &'static str = "log";
    pub const DISCARD: &'static str = "discard";

    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `log` and `discard` handlers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Self::LOG, LogResultHandler);
        registry.register(Self::DISCARD, DiscardResultHandler);
        registry
    }

    pub fn register<H>(&mut self, name: &str, handler: H) -> &mut Self
    where
        H: ResultHandler + 'static,
    {
        self.handlers.insert(name.to_string(), Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ResultHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| LeakWatchError::HandlerNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Deletes the snapshot file when dropped, including during unwinding
#[derive(Debug)]
pub struct SnapshotFileGuard {
    path: Option<PathBuf>,
}

impl SnapshotFileGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Delete now. Returns `true` if a file was removed by this call.
    pub fn delete(&mut self) -> bool {
        let Some(path) = self.path.take() else {
            return false;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted snapshot {}", path.display());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Snapshot {} already gone", path.display());
                false
            }
            Err(e) => {
                warn!("Failed to delete snapshot {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Give up ownership without deleting
    pub fn disarm(mut self) -> Option<PathBuf> {
        self.path.take()
    }
}

impl Drop for SnapshotFileGuard {
    fn drop(&mut self) {
        self.delete();
    }
}

/// Hand a result to `handler`, then delete the snapshot file on every exit path
pub fn deliver_result(
    handler: &dyn ResultHandler,
    metadata: &SnapshotMetadata,
    result: &AnalysisResult,
) -> anyhow::Result<()> {
    let _guard = SnapshotFileGuard::new(&metadata.snapshot_file);
    handler.on_snapshot_analyzed(metadata, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::ExclusionPolicy;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn metadata_for(path: &Path) -> SnapshotMetadata {
        SnapshotMetadata {
            snapshot_file: path.to_path_buf(),
            reference_key: "key".to_string(),
            reference_name: "name".to_string(),
            exclusion_policy: ExclusionPolicy::default(),
            watch_duration_ms: 1,
            gc_duration_ms: 1,
            capture_duration_ms: 1,
        }
    }

    fn snapshot_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("leak.snapshot.json");
        std::fs::write(&path, b"{}").unwrap();
        path
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ResultHandlerRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["discard", "log"]);
        assert!(registry.get("log").is_ok());

        let err = registry.get("display").err().unwrap();
        assert!(matches!(err, LeakWatchError::HandlerNotFound(ref name) if name == "display"));
    }

    #[test]
    fn test_file_deleted_after_success() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_file(&dir);
        let calls = AtomicUsize::new(0);

        let handler = |metadata: &SnapshotMetadata, _: &AnalysisResult| -> anyhow::Result<()> {
            // Still present while the handler runs.
            assert!(metadata.snapshot_file.exists());
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        deliver_result(&handler, &metadata_for(&path), &AnalysisResult::no_leak(0)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_file_deleted_after_handler_error() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_file(&dir);

        let handler = |_: &SnapshotMetadata, _: &AnalysisResult| -> anyhow::Result<()> {
            anyhow::bail!("upload failed")
        };

        let err = deliver_result(&handler, &metadata_for(&path), &AnalysisResult::no_leak(0))
            .unwrap_err();
        assert_eq!(err.to_string(), "upload failed");
        assert!(!path.exists());
    }

    #[test]
    fn test_file_deleted_after_handler_panic() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_file(&dir);
        let metadata = metadata_for(&path);

        let handler = |_: &SnapshotMetadata, _: &AnalysisResult| -> anyhow::Result<()> {
            panic!("handler crashed")
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            deliver_result(&handler, &metadata, &AnalysisResult::no_leak(0))
        }));
        assert!(outcome.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_guard_deletes_once() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_file(&dir);

        let mut guard = SnapshotFileGuard::new(&path);
        assert!(guard.delete());
        assert!(!guard.delete());
        assert!(guard.path().is_none());

        // Recreated file must survive the guard's drop.
        std::fs::write(&path, b"{}").unwrap();
        drop(guard);
        assert!(path.exists());
    }

    #[test]
    fn test_disarmed_guard_keeps_file() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_file(&dir);

        let guard = SnapshotFileGuard::new(&path);
        assert_eq!(guard.disarm(), Some(path.clone()));
        assert!(path.exists());
    }
}
