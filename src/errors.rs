//! Error taxonomy for the upload pipeline plus the HTTP-facing wrapper.
//!
//! `UploadError` is the single channel through which a parse fails: every
//! failure surfaces exactly once through the `Result` of `UploadForm::parse`,
//! nothing is retried internally, and a failed session is not restartable.
//! `AppError` translates errors into status codes at the HTTP edge; the core
//! itself makes no HTTP-status decisions.

use crate::storage::StorageWriteError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Errors produced by the upload pipeline.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Missing or invalid mandatory construction arguments. Raised
    /// synchronously by `UploadForm::new`, never deferred to first use.
    #[error("invalid configuration: {0}")]
    Configuration(&'static str),

    /// Boundary or header parsing failure, or a truncated body. No partial
    /// fields or files are returned once this is raised.
    #[error("malformed multipart body: {0}")]
    Malformed(String),

    /// Backend write or finalize failure for a file part. Aborts the whole
    /// session; no partial success.
    #[error("storage write failed: {0}")]
    Storage(#[from] StorageWriteError),

    /// Underlying byte source failed or disconnected mid-stream.
    #[error("transport failed: {0}")]
    Transport(#[from] io::Error),
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Malformed(_) | UploadError::Transport(_) => {
                AppError::bad_request(err.to_string())
            }
            UploadError::Configuration(_) | UploadError::Storage(_) => {
                AppError::internal(err.to_string())
            }
        }
    }
}

impl From<StorageWriteError> for AppError {
    fn from(err: StorageWriteError) -> Self {
        match err {
            StorageWriteError::NotFound(_) => AppError::not_found(err.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
