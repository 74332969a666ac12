//! Error types for tidepool.

use thiserror::Error;

/// Result type alias using tidepool's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tidepool operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found (user, server, account, stream)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Natural-key collision on create
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input (bad direction/position/mode, malformed server address)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No unadmitted status available for admission
    #[error("No status available in pool")]
    Empty,

    /// Remote timeline service failed; progress up to the last committed
    /// page is preserved
    #[error("Remote service unavailable: {0}")]
    Unavailable(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
