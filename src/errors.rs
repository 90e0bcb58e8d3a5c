use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::{
    blob_store::BlobStoreError, catalog_index::CatalogError, upload_coordinator::UploadError,
};

/// Coarse failure categories shared by both backends and the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    NoFileProvided,
    BackendUnavailable,
    WriteRejected,
    NotFound,
    InvalidRequest,
}

impl FailureClass {
    pub fn status(self) -> StatusCode {
        match self {
            FailureClass::NoFileProvided | FailureClass::InvalidRequest => StatusCode::BAD_REQUEST,
            FailureClass::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            FailureClass::WriteRejected => StatusCode::BAD_REQUEST,
            FailureClass::NotFound => StatusCode::NOT_FOUND,
        }
    }
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

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
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

impl From<BlobStoreError> for AppError {
    fn from(err: BlobStoreError) -> Self {
        let status = match &err {
            BlobStoreError::Rejected(_) => StatusCode::INSUFFICIENT_STORAGE,
            other => other.class().status(),
        };
        AppError::new(status, err.to_string())
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        AppError::new(err.class().status(), err.to_string())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Blob(inner) => inner.into(),
            other => AppError::new(other.class().status(), other.to_string()),
        }
    }
}
