//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("invalid DSN: {0}")]
    InvalidDsn(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("unsupported driver: {0}")]
    UnsupportedDriver(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Http(e.to_string())
    }
}

impl From<refract_core::Error> for StorageError {
    fn from(e: refract_core::Error) -> Self {
        StorageError::InvalidKey(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
