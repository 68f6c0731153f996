//! Data moved across the analysis boundary

use crate::error::{LeakWatchError, Result};
use crate::exclusion::ExclusionPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Current envelope wire version
pub const ENVELOPE_VERSION: u32 = 1;

/// Everything the analysis side needs to diagnose one retained object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Snapshot file; deleted by the receiver once the result handler returns
    pub snapshot_file: PathBuf,

    /// Key of the probe that stayed retained
    pub reference_key: String,

    /// Label given at watch time (may be empty)
    pub reference_name: String,

    pub exclusion_policy: ExclusionPolicy,

    /// Time from `watch()` to the start of the check that found the leak
    pub watch_duration_ms: u64,

    /// Time spent forcing collection and re-checking
    pub gc_duration_ms: u64,

    /// Time spent writing the snapshot
    pub capture_duration_ms: u64,
}

/// Outcome of analyzing one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub leak_found: bool,

    /// A leak was found but matched an exclusion rule
    pub excluded_leak: bool,

    /// Type of the retained object
    pub class_name: Option<String>,

    /// Human-oriented lines describing how the object is retained
    #[serde(default)]
    pub leak_trace: Vec<String>,

    pub shallow_size_bytes: Option<u64>,

    /// Set when the analysis itself could not complete
    pub failure: Option<String>,

    pub analysis_duration_ms: u64,
}

impl AnalysisResult {
    pub fn no_leak(analysis_duration_ms: u64) -> Self {
        Self {
            leak_found: false,
            excluded_leak: false,
            class_name: None,
            leak_trace: Vec::new(),
            shallow_size_bytes: None,
            failure: None,
            analysis_duration_ms,
        }
    }

    pub fn leak_detected(
        excluded_leak: bool,
        class_name: String,
        leak_trace: Vec<String>,
        shallow_size_bytes: Option<u64>,
        analysis_duration_ms: u64,
    ) -> Self {
        Self {
            leak_found: true,
            excluded_leak,
            class_name: Some(class_name),
            leak_trace,
            shallow_size_bytes,
            failure: None,
            analysis_duration_ms,
        }
    }

    pub fn failure(failure: impl Into<String>, analysis_duration_ms: u64) -> Self {
        Self {
            failure: Some(failure.into()),
            ..Self::no_leak(analysis_duration_ms)
        }
    }
}

/// Wire form of a handoff: one JSON document per line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub version: u32,

    /// Name of the result handler that receives the analysis
    pub result_handler: String,

    pub metadata: SnapshotMetadata,
}

impl SnapshotEnvelope {
    pub fn new(result_handler: &str, metadata: SnapshotMetadata) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            result_handler: result_handler.to_string(),
            metadata,
        }
    }

    /// Serialize to a single line, without the trailing newline
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and version-check a line
    pub fn from_line(line: &str) -> Result<Self> {
        let envelope = Self::parse_line(line)?;
        envelope.check_version()?;
        Ok(envelope)
    }

    /// Parse a line without looking at the version
    pub fn parse_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }

    pub fn check_version(&self) -> Result<()> {
        if self.version != ENVELOPE_VERSION {
            return Err(LeakWatchError::InvalidArgument(format!(
                "unsupported envelope version {} (expected {})",
                self.version, ENVELOPE_VERSION
            )));
        }
        Ok(())
    }
}
