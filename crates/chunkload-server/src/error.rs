//! Server error types
//!
//! [`IngestError`] is what escapes a delivery: every other outcome (malformed
//! name, stale or duplicate chunk, missing destination table, expired event)
//! is resolved inside the handler and reported as a successful
//! [`crate::ingest::Outcome`]. Anything returned as an error is answered with
//! a 5xx so the delivery platform retries it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Errors that abort handling of a delivery
#[derive(Error, Debug)]
pub enum IngestError {
    /// Another chunk of the same generation holds the truncate claim and has
    /// not finished loading
    #[error("first chunk {claimant} of table {table_id} is still loading")]
    Contention { table_id: String, claimant: String },

    /// The optimistic transaction kept losing races
    #[error("state transaction for table {table_id} gave up after {attempts} attempts")]
    TransactionExhausted { table_id: String, attempts: usize },

    #[error("invalid state document for table {table_id}: {reason}")]
    InvalidState { table_id: String, reason: String },

    #[error("object store error: {0:#}")]
    Storage(anyhow::Error),

    #[error("warehouse load failed: {0:#}")]
    Warehouse(anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::Storage(err.into())
    }

    pub fn warehouse(err: impl Into<anyhow::Error>) -> Self {
        Self::Warehouse(err.into())
    }

    /// Contention is expected under concurrent delivery; everything else is
    /// an unknown failure left to the platform's retry policy
    pub fn is_contention(&self) -> bool {
        matches!(self, IngestError::Contention { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Contention { .. } | IngestError::TransactionExhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        // Already logged inside the delivery span
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "status": status.as_u16(),
                "retryable": true,
            }
        }));

        (status, body).into_response()
    }
}

/// Errors of the non-delivery endpoints
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::Ingest(err) => return err.into_response(),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
