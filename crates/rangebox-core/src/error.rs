//! Error types for the core layer.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration error (bad value, failed validation).
    #[error("configuration error: {0}")]
    Config(String),

    /// Docker Engine API error.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Container runtime operation failed.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
