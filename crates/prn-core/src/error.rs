//! Error types for the prn core library.

use thiserror::Error;

/// Result type alias using the prn core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types shared by the prn binaries.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing or malformed environment variables)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
