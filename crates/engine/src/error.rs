//! Engine error types.

use thiserror::Error;

/// Derivation errors. `Timeout` is distinct from other tool failures so the
/// server can log deadline expiries separately.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: &'static str, seconds: u64 },

    #[error("{tool} failed: {stderr}")]
    Tool { tool: &'static str, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("probe output unusable: {0}")]
    Probe(String),

    #[error("no embedded artwork in {0}")]
    NoArtwork(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
