//! Snapshot analysis
//!
//! Turns a captured snapshot plus the key of the suspicious probe into an
//! [`AnalysisResult`]. Runs on the analysis worker, never on the watcher's
//! threads.

use crate::capture::HeapSnapshot;
use crate::exclusion::ExclusionPolicy;
use crate::handoff::AnalysisResult;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

pub trait LeakAnalyzer: Send + Sync {
    fn check_for_leak(
        &self,
        snapshot_file: &Path,
        reference_key: &str,
        policy: &ExclusionPolicy,
    ) -> AnalysisResult;
}

/// Analyzes snapshots written by [`crate::capture::HeapSnapshotCapture`]
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapSnapshotAnalyzer;

impl LeakAnalyzer for HeapSnapshotAnalyzer {
    fn check_for_leak(
        &self,
        snapshot_file: &Path,
        reference_key: &str,
        policy: &ExclusionPolicy,
    ) -> AnalysisResult {
        let start = Instant::now();
        let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

        let snapshot = match HeapSnapshot::read_from(snapshot_file) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return AnalysisResult::failure(
                    format!("could not read {}: {}", snapshot_file.display(), e),
                    elapsed(start),
                )
            }
        };

        let entry = match snapshot.entry(reference_key) {
            Some(entry) if entry.alive => entry,
            _ => {
                debug!(key = reference_key, "Reference collected before capture");
                return AnalysisResult::no_leak(elapsed(start));
            }
        };

        let trace = vec![
            format!("{} ({})", entry.type_name, display_name(&entry.name)),
            format!("retained in process {} at {}", snapshot.pid, snapshot.captured_at.to_rfc3339()),
        ];

        match policy.find_match(&entry.type_name, &entry.name) {
            Some(rule) if rule.always_exclude => {
                debug!(key = reference_key, reason = %rule.reason, "Leak always excluded");
                AnalysisResult::no_leak(elapsed(start))
            }
            Some(rule) => {
                let mut trace = trace;
                trace.push(format!("excluded: {}", rule.reason));
                AnalysisResult::leak_detected(
                    true,
                    entry.type_name.clone(),
                    trace,
                    Some(entry.shallow_size),
                    elapsed(start),
                )
            }
            None => AnalysisResult::leak_detected(
                false,
                entry.type_name.clone(),
                trace,
                Some(entry.shallow_size),
                elapsed(start),
            ),
        }
    }
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "unnamed"
    } else {
        name
    }
}
