//! Common error types for Courier.

use thiserror::Error;

/// Top-level error type for Courier operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A single delivery attempt failed and may be retried.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A message exhausted its retry budget.
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// The persistence store could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scheduler is not running or was already started.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
