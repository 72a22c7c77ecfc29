//! Error types for netmuxd

use netmux_core::{ConfigError, MuxError, OpenError};
use thiserror::Error;

/// Daemon errors
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The engine refused an operation
    #[error("Engine error: {0}")]
    Engine(#[from] MuxError),

    /// A blocking engine task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Statistics could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<OpenError> for DaemonError {
    fn from(err: OpenError) -> Self {
        DaemonError::Engine(err.into())
    }
}

impl From<tokio::task::JoinError> for DaemonError {
    fn from(err: tokio::task::JoinError) -> Self {
        DaemonError::Task(err.to_string())
    }
}

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;
