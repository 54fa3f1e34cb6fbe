//! Common error types for MWA.

use thiserror::Error;

/// Result type alias using the shared MWA error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for MWA operations that are not tied to one layer.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (snapshot files, config files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
