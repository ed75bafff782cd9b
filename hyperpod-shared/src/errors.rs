//! Error types used across the Hyperpod daemon.

use thiserror::Error;

/// Result type for Hyperpod operations.
pub type HyperpodResult<T> = Result<T, HyperpodError>;

#[derive(Debug, Error)]
pub enum HyperpodError {
    #[error("pod capacity exceeded: {0}")]
    Capacity(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid pod spec: {0}")]
    Validation(String),

    #[error("already running: {0}")]
    AlreadyRunning(String),

    #[error("container engine error: {0}")]
    Engine(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("hypervisor protocol violation: {0}")]
    Protocol(String),

    #[error("log configuration error: {0}")]
    LogConfig(String),

    #[error("internal error: {0}")]
    Internal(String),
}

// Implement From for common error types to enable `?` operator
impl From<std::io::Error> for HyperpodError {
    fn from(err: std::io::Error) -> Self {
        HyperpodError::Internal(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for HyperpodError {
    fn from(err: serde_json::Error) -> Self {
        HyperpodError::Internal(format!("JSON error: {}", err))
    }
}

impl From<String> for HyperpodError {
    fn from(err: String) -> Self {
        HyperpodError::Internal(err)
    }
}

impl From<&str> for HyperpodError {
    fn from(err: &str) -> Self {
        HyperpodError::Internal(err.to_string())
    }
}
