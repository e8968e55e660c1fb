//! API error types.

use axum::http::StatusCode;
use axum::http::header::CACHE_CONTROL;
use axum::response::{IntoResponse, Response};
use refract_engine::EngineError;
use refract_storage::StorageError;

/// API error type. Bodies are plain text; the pipeline decorates redirects
/// and debug responses itself.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("forbidden domain")]
    ForbiddenDomain,

    #[error("unsupported media type")]
    UnsupportedMedia,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("staging in progress")]
    StagingInProgress,

    #[error("range not satisfiable")]
    RangeNotSatisfiable,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("processing error: {0}")]
    Engine(#[from] EngineError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] refract_metadata::MetadataError),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ForbiddenDomain => StatusCode::FORBIDDEN,
            Self::UnsupportedMedia => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StagingInProgress => StatusCode::TEMPORARY_REDIRECT,
            Self::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Internal(_) | Self::Engine(_) | Self::Metadata(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            // The pipeline normally intercepts this and sets Location; a bare
            // in-progress error still tells clients not to cache.
            Self::StagingInProgress => (
                status,
                [(CACHE_CONTROL, "no-store, no-cache, must-revalidate, max-age=0")],
                self.to_string(),
            )
                .into_response(),
            _ => (status, self.to_string()).into_response(),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
