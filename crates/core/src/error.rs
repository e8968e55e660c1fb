//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("unknown video profile: {0}")]
    UnknownProfile(String),

    #[error("invalid cache size: {0}")]
    InvalidCacheSize(String),

    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
