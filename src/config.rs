//! Watcher configuration
//!
//! Loaded from TOML, then overridden from the environment:
//! - `LEAKWATCH_ENABLED`
//! - `LEAKWATCH_WATCH_DELAY_MS`
//! - `LEAKWATCH_SNAPSHOT_DIR`

use crate::capture::SnapshotDirectory;
use crate::error::{LeakWatchError, Result};
use crate::exclusion::{ExclusionPolicy, ExclusionRule};
use crate::handoff::ResultHandlerRegistry;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const ENV_ENABLED: &str = "LEAKWATCH_ENABLED";
pub const ENV_WATCH_DELAY_MS: &str = "LEAKWATCH_WATCH_DELAY_MS";
pub const ENV_SNAPSHOT_DIR: &str = "LEAKWATCH_SNAPSHOT_DIR";

/// Where snapshots are analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Dedicated thread in the watching process
    #[default]
    Thread,

    /// `leakwatch analyze` child process per snapshot
    Process,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Build a working watcher (otherwise a disabled one)
    pub enabled: bool,

    /// Delay before the first liveness check (in milliseconds)
    #[serde(with = "serde_duration_ms")]
    pub watch_delay: Duration,

    /// Snapshot directory; defaults to the user cache dir
    pub snapshot_dir: Option<PathBuf>,

    /// Oldest snapshots beyond this count are deleted
    pub max_stored_snapshots: usize,

    /// Name of the handler that receives analysis results
    pub result_handler: String,

    pub analysis_mode: AnalysisMode,

    /// Worker binary for [`AnalysisMode::Process`]; defaults to the current
    /// executable
    pub worker_program: Option<PathBuf>,

    pub exclusions: Vec<ExclusionRule>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_delay: Duration::from_secs(5),
            snapshot_dir: None,
            max_stored_snapshots: SnapshotDirectory::DEFAULT_MAX_STORED,
            result_handler: ResultHandlerRegistry::LOG.to_string(),
            analysis_mode: AnalysisMode::Thread,
            worker_program: None,
            exclusions: Vec::new(),
        }
    }
}

mod serde_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

impl WatchConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: WatchConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration from the environment only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LEAKWATCH_*` environment variables on top of current values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = env::var(ENV_ENABLED) {
            self.enabled = parse_bool(&value).ok_or_else(|| {
                LeakWatchError::Config(format!("{} must be true or false, got '{}'", ENV_ENABLED, value))
            })?;
            debug!("Using enabled={} from {}", self.enabled, ENV_ENABLED);
        }

        if let Ok(value) = env::var(ENV_WATCH_DELAY_MS) {
            let ms: u64 = value.trim().parse().map_err(|_| {
                LeakWatchError::Config(format!(
                    "{} must be a number of milliseconds, got '{}'",
                    ENV_WATCH_DELAY_MS, value
                ))
            })?;
            self.watch_delay = Duration::from_millis(ms);
            debug!("Using watch delay {}ms from {}", ms, ENV_WATCH_DELAY_MS);
        }

        if let Ok(value) = env::var(ENV_SNAPSHOT_DIR) {
            if value.is_empty() {
                warn!("{} is set but empty, ignoring", ENV_SNAPSHOT_DIR);
            } else {
                debug!("Using snapshot dir {} from {}", value, ENV_SNAPSHOT_DIR);
                self.snapshot_dir = Some(PathBuf::from(value));
            }
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.watch_delay.is_zero() {
            return Err(LeakWatchError::Config(
                "watch_delay must be greater than zero".to_string(),
            ));
        }

        if self.max_stored_snapshots < 1 {
            return Err(LeakWatchError::Config(
                "max_stored_snapshots must be at least 1".to_string(),
            ));
        }

        if self.result_handler.trim().is_empty() {
            return Err(LeakWatchError::Config(
                "result_handler must not be empty".to_string(),
            ));
        }

        self.exclusion_policy()
            .map_err(|e| LeakWatchError::Config(e.to_string()))?;

        Ok(())
    }

    /// Resolved snapshot directory
    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir.clone().unwrap_or_else(default_snapshot_dir)
    }

    pub fn exclusion_policy(&self) -> Result<ExclusionPolicy> {
        ExclusionPolicy::from_rules(self.exclusions.clone())
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let toml_str =
            toml::to_string_pretty(self).map_err(|e| LeakWatchError::Config(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}

/// `<cache dir>/leakwatch/snapshots`, or the temp dir if there is no cache dir
pub fn default_snapshot_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("leakwatch")
        .join("snapshots")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::ExclusionKind;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        env::remove_var(ENV_ENABLED);
        env::remove_var(ENV_WATCH_DELAY_MS);
        env::remove_var(ENV_SNAPSHOT_DIR);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = WatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.watch_delay, Duration::from_secs(5));
        assert_eq!(config.max_stored_snapshots, 7);
        assert!(config.snapshot_dir().ends_with("leakwatch/snapshots"));
    }

    #[test]
    fn test_validate_zero_watch_delay() {
        let config = WatchConfig {
            watch_delay: Duration::ZERO,
            ..Default::default()
        };

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("watch_delay must be greater than zero"));
    }

    #[test]
    fn test_validate_zero_max_stored() {
        let config = WatchConfig {
            max_stored_snapshots: 0,
            ..Default::default()
        };

        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("max_stored_snapshots must be at least 1"));
    }

    #[test]
    fn test_validate_bad_exclusion_pattern() {
        let toml = r#"
            [[exclusions]]
            kind = "type_name"
            pattern = "(unclosed"
        "#;

        let err = WatchConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("invalid exclusion pattern"));
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            enabled = true
            watch_delay = 250
            snapshot_dir = "/var/tmp/leaks"
            max_stored_snapshots = 3
            result_handler = "discard"
            analysis_mode = "process"

            [[exclusions]]
            kind = "reference_name"
            pattern = "^cache$"
            reason = "process-wide cache"
            always_exclude = true
        "#;

        let config = WatchConfig::from_toml(toml).unwrap();
        assert_eq!(config.watch_delay, Duration::from_millis(250));
        assert_eq!(config.snapshot_dir(), PathBuf::from("/var/tmp/leaks"));
        assert_eq!(config.max_stored_snapshots, 3);
        assert_eq!(config.result_handler, "discard");
        assert_eq!(config.analysis_mode, AnalysisMode::Process);

        let policy = config.exclusion_policy().unwrap();
        assert_eq!(policy.rules()[0].kind, ExclusionKind::ReferenceName);
        assert!(policy.rules()[0].always_exclude);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = WatchConfig::from_toml("watch_delay = 1000").unwrap();
        assert!(config.enabled);
        assert_eq!(config.result_handler, "log");
        assert_eq!(config.analysis_mode, AnalysisMode::Thread);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("leakwatch.toml");

        let config = WatchConfig {
            watch_delay: Duration::from_millis(1500),
            snapshot_dir: Some(dir.path().join("snaps")),
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        let loaded = WatchConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var(ENV_ENABLED, "false");
        env::set_var(ENV_WATCH_DELAY_MS, "40");
        env::set_var(ENV_SNAPSHOT_DIR, "/tmp/leakwatch-env");

        let config = WatchConfig::from_env().unwrap();
        clear_env();

        assert!(!config.enabled);
        assert_eq!(config.watch_delay, Duration::from_millis(40));
        assert_eq!(config.snapshot_dir(), PathBuf::from("/tmp/leakwatch-env"));
    }

    #[test]
    #[serial]
    fn test_env_override_rejects_garbage() {
        clear_env();
        env::set_var(ENV_WATCH_DELAY_MS, "soon");

        let err = WatchConfig::from_env().unwrap_err();
        clear_env();

        assert!(err.to_string().contains(ENV_WATCH_DELAY_MS));
    }
}
