use crate::services::{
    ingest_service::IngestError, product_service::ProductError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
///
/// Rendered as `{"success": false, "message": ...}`. The message is always
/// client-safe; internal detail goes to the log, not the response.
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

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
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
            "success": false,
            "message": self.message,
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("unhandled error: {:#}", err);
        AppError::internal("Internal server error")
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(e) => AppError::bad_request(e.to_string()),
            IngestError::PayloadTooLarge { limit } => AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("File too large. Maximum size is {} MB", limit / (1024 * 1024)),
            ),
            IngestError::MalformedUpload(msg) => AppError::bad_request(msg),
            // Detail is logged by the pipeline; staging paths stay private.
            IngestError::Staging(_) => AppError::internal("Failed to store uploaded file"),
            IngestError::RemoteUpload(_) => AppError::internal("Error uploading image"),
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

impl From<ProductError> for AppError {
    fn from(err: ProductError) -> Self {
        match err {
            ProductError::NotFound(_) => AppError::not_found(err.to_string()),
            ProductError::DuplicateBarcode(_) | ProductError::Conflict(_) => {
                AppError::new(StatusCode::CONFLICT, err.to_string())
            }
            ProductError::InvalidInput(msg) => AppError::bad_request(msg),
            ProductError::Sqlx(e) => {
                tracing::error!("database error: {}", e);
                AppError::internal("Database error")
            }
        }
    }
}
