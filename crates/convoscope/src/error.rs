//! Error types for the analysis backend

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Result type alias for backend operations
pub type Result<T> = std::result::Result<T, Error>;

/// Backend errors
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unreadable document, invalid options
    #[error("{0}")]
    Validation(String),

    /// The external analysis routine failed
    #[error("Analysis failed: {0}")]
    Analysis(String),

    /// Unknown job or document reference
    #[error("{0} not found")]
    NotFound(String),

    /// Job exceeded its configured duration
    #[error("Job exceeded maximum duration of {0}s")]
    Timeout(u64),

    /// Cache read/write failure (never surfaced to callers)
    #[error("Cache error: {0}")]
    Cache(String),

    /// Queue depth cap reached
    #[error("Job queue is full ({0} jobs pending)")]
    QueueFull(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure classification recorded on failed jobs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Analysis,
    Timeout,
    Internal,
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an analysis error
    pub fn analysis(message: impl Into<String>) -> Self {
        Self::Analysis(message.into())
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Kind recorded on a job that failed with this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::Json(_) | Error::NotFound(_) => ErrorKind::Validation,
            Error::Analysis(_) => ErrorKind::Analysis,
            Error::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Internal,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Error::Json(_) => (StatusCode::BAD_REQUEST, "json_error"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Analysis(_) => (StatusCode::INTERNAL_SERVER_ERROR, "analysis_error"),
            Error::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            Error::QueueFull(_) => (StatusCode::SERVICE_UNAVAILABLE, "queue_full"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            Error::Cache(_) => (StatusCode::INTERNAL_SERVER_ERROR, "cache_error"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
