//! Error types shared by certgate's data model.

use thiserror::Error;

/// Result type for certgate-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors arising from the data model itself (not a backend integration).
#[derive(Error, Debug)]
pub enum Error {
    /// A domain set, PEM blob, or wire message failed to parse.
    #[error("parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server error
    #[error("server error: {0}")]
    Server(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}
