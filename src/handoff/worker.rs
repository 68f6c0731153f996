//! Analysis worker
//!
//! Deserializes envelopes, runs the analyzer and delivers results. Runs either
//! on a dedicated thread of the watching process ([`AnalysisWorker`]) or in a
//! separate process fed through stdin ([`run_worker`]).

use super::handler::{deliver_result, ResultHandlerRegistry, SnapshotFileGuard};
use super::{AnalysisResult, SnapshotEnvelope};
use crate::analyzer::LeakAnalyzer;
use crate::error::Result;
use std::io::BufRead;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Name of the in-process analysis thread
pub const ANALYZER_THREAD_NAME: &str = "LeakWatch-Analyzer";

/// Analyze one envelope and deliver the result to its handler.
///
/// The snapshot file is deleted on every path out of this function, including
/// an unknown handler name.
pub fn process_envelope(
    envelope: SnapshotEnvelope,
    registry: &ResultHandlerRegistry,
    analyzer: &dyn LeakAnalyzer,
) -> Result<AnalysisResult> {
    let metadata = envelope.metadata;
    let guard = SnapshotFileGuard::new(&metadata.snapshot_file);

    let handler = registry.get(&envelope.result_handler)?;
    debug!(
        key = %metadata.reference_key,
        handler = %envelope.result_handler,
        "Analyzing snapshot {}",
        metadata.snapshot_file.display()
    );
    let result = analyzer.check_for_leak(
        &metadata.snapshot_file,
        &metadata.reference_key,
        &metadata.exclusion_policy,
    );

    // deliver_result takes over deletion from here.
    guard.disarm();
    deliver_result(handler.as_ref(), &metadata, &result)?;
    Ok(result)
}

/// Parse and process one wire line. A panicking handler is contained here.
///
/// An envelope that parses but is rejected still has its snapshot deleted.
pub fn process_line(
    line: &str,
    registry: &ResultHandlerRegistry,
    analyzer: &dyn LeakAnalyzer,
) -> Result<AnalysisResult> {
    let envelope = SnapshotEnvelope::parse_line(line)?;
    if let Err(e) = envelope.check_version() {
        SnapshotFileGuard::new(&envelope.metadata.snapshot_file).delete();
        return Err(e);
    }
    match catch_unwind(AssertUnwindSafe(|| process_envelope(envelope, registry, analyzer))) {
        Ok(outcome) => outcome,
        Err(_) => Err(crate::error::LeakWatchError::Other(
            "result handler panicked".to_string(),
        )),
    }
}

/// Process every envelope line from `reader` until EOF. Returns how many were
/// delivered successfully; failures are logged and skipped.
pub fn run_worker<R: BufRead>(
    reader: R,
    registry: &ResultHandlerRegistry,
    analyzer: &dyn LeakAnalyzer,
) -> Result<usize> {
    let mut delivered = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match process_line(&line, registry, analyzer) {
            Ok(result) => {
                delivered += 1;
                debug!(leak_found = result.leak_found, "Envelope processed");
            }
            Err(e) => error!("Failed to process snapshot envelope: {}", e),
        }
    }
    Ok(delivered)
}

/// In-process analysis worker: a dedicated thread consuming serialized
/// envelopes one at a time.
#[derive(Clone)]
pub struct AnalysisWorker {
    tx: mpsc::UnboundedSender<String>,
}

impl AnalysisWorker {
    pub fn spawn(
        registry: ResultHandlerRegistry,
        analyzer: Arc<dyn LeakAnalyzer>,
    ) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        thread::Builder::new()
            .name(ANALYZER_THREAD_NAME.to_string())
            .spawn(move || {
                info!("Analysis worker started");
                while let Some(line) = rx.blocking_recv() {
                    if let Err(e) = process_line(&line, &registry, analyzer.as_ref()) {
                        error!("Failed to process snapshot envelope: {}", e);
                    }
                }
                info!("Analysis worker stopped");
            })?;

        Ok(Self { tx })
    }

    /// Queue a serialized envelope. Returns `false` if the worker has stopped.
    pub fn submit(&self, line: String) -> bool {
        self.tx.send(line).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::HeapSnapshotAnalyzer;
    use crate::exclusion::ExclusionPolicy;
    use crate::handoff::SnapshotMetadata;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FixedAnalyzer(AnalysisResult);

    impl LeakAnalyzer for FixedAnalyzer {
        fn check_for_leak(&self, _: &Path, _: &str, _: &ExclusionPolicy) -> AnalysisResult {
            self.0.clone()
        }
    }

    fn envelope(handler: &str, path: &Path) -> SnapshotEnvelope {
        SnapshotEnvelope::new(
            handler,
            SnapshotMetadata {
                snapshot_file: path.to_path_buf(),
                reference_key: "k".to_string(),
                reference_name: "n".to_string(),
                exclusion_policy: ExclusionPolicy::default(),
                watch_duration_ms: 0,
                gc_duration_ms: 0,
                capture_duration_ms: 0,
            },
        )
    }

    fn snapshot_file(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"{}").unwrap();
        path
    }

    #[test]
    fn test_unknown_handler_still_deletes_file() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_file(&dir, "a.snapshot.json");

        let err = process_envelope(
            envelope("missing", &path),
            &ResultHandlerRegistry::with_builtins(),
            &HeapSnapshotAnalyzer,
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert!(!path.exists());
    }

    #[test]
    fn test_handler_receives_result() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_file(&dir, "b.snapshot.json");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut registry = ResultHandlerRegistry::new();
        let sink = seen.clone();
        registry.register("collect", move |m: &SnapshotMetadata, r: &AnalysisResult| -> anyhow::Result<()> {
            sink.lock().unwrap().push((m.reference_key.clone(), r.leak_found));
            Ok(())
        });

        let analyzer = FixedAnalyzer(AnalysisResult::leak_detected(
            false,
            "app::Session".to_string(),
            vec![],
            None,
            1,
        ));
        let result = process_envelope(envelope("collect", &path), &registry, &analyzer).unwrap();

        assert!(result.leak_found);
        assert_eq!(*seen.lock().unwrap(), vec![("k".to_string(), true)]);
        assert!(!path.exists());
    }

    #[test]
    fn test_rejected_version_deletes_file() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_file(&dir, "v2.snapshot.json");
        let mut newer = envelope("log", &path);
        newer.version = 2;
        let input = format!("{}\n", serde_json::to_string(&newer).unwrap());

        let delivered = run_worker(
            input.as_bytes(),
            &ResultHandlerRegistry::with_builtins(),
            &HeapSnapshotAnalyzer,
        )
        .unwrap();

        assert_eq!(delivered, 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_run_worker_survives_panicking_handler() {
        let dir = TempDir::new().unwrap();
        let first = snapshot_file(&dir, "1.snapshot.json");
        let second = snapshot_file(&dir, "2.snapshot.json");

        let mut registry = ResultHandlerRegistry::with_builtins();
        registry.register("explode", |_: &SnapshotMetadata, _: &AnalysisResult| -> anyhow::Result<()> {
            panic!("consumer crashed")
        });

        let input = format!(
            "{}\n\nnot json\n{}\n",
            envelope("explode", &first).to_line().unwrap(),
            envelope("discard", &second).to_line().unwrap(),
        );

        let delivered = run_worker(
            input.as_bytes(),
            &registry,
            &FixedAnalyzer(AnalysisResult::no_leak(0)),
        )
        .unwrap();

        assert_eq!(delivered, 1);
        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[test]
    fn test_analysis_worker_thread() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_file(&dir, "c.snapshot.json");
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = Mutex::new(tx);

        let mut registry = ResultHandlerRegistry::new();
        registry.register("notify", move |m: &SnapshotMetadata, _: &AnalysisResult| -> anyhow::Result<()> {
            let name = std::thread::current().name().map(str::to_string);
            tx.lock().unwrap().send((m.snapshot_file.clone(), name)).unwrap();
            Ok(())
        });

        let worker =
            AnalysisWorker::spawn(registry, Arc::new(FixedAnalyzer(AnalysisResult::no_leak(0))))
                .unwrap();
        assert!(worker.submit(envelope("notify", &path).to_line().unwrap()));

        let (file, thread_name) = rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .unwrap();
        assert_eq!(file, path);
        assert_eq!(thread_name.as_deref(), Some(ANALYZER_THREAD_NAME));

        // Deletion happens right after the handler returns.
        for _ in 0..50 {
            if !path.exists() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(!path.exists());
    }
}
