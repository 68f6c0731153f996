//! Error types for the LeakWatch leak detector
//!
//! This module provides error handling using thiserror for structured error
//! definitions and anyhow for errors raised by host-supplied callbacks.
//!
//! Expected, recoverable conditions (a debugger being attached, a snapshot
//! capture already in flight) are never errors: they surface as
//! [`RetryOutcome::Retry`](crate::executor::RetryOutcome::Retry).

use thiserror::Error;

/// Main error type for LeakWatch operations
#[derive(Error, Debug)]
pub enum LeakWatchError {
    /// Programming error at the call site (dangling watch target, zero limits)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The configured result handler is not registered
    #[error("Result handler not found: {0}")]
    HandlerNotFound(String),

    /// The analysis worker program cannot be located or started
    #[error("Analysis worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse error
    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for LeakWatch operations
pub type Result<T> = std::result::Result<T, LeakWatchError>;

/// Convert anyhow::Error to LeakWatchError
impl From<anyhow::Error> for LeakWatchError {
    fn from(err: anyhow::Error) -> Self {
        LeakWatchError::Other(err.to_string())
    }
}
