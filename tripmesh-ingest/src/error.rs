//! Error types for tripmesh-ingest
//!
//! `IngestError` is the pipeline's typed failure. Only parse, decoding and
//! unexpected persistence failures reach it; row-count failures, group
//! creation conflicts and notification delivery failures are absorbed where
//! they occur.
//!
//! `ApiError` maps failures onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tripmesh_common::JobStatus;
use uuid::Uuid;

/// Ingestion pipeline error
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed coordinate or timestamp text
    #[error("Parse error: {0}")]
    Parse(String),

    /// Source file could not be decoded as CSV
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Source file could not be opened or read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage failure other than an expected uniqueness conflict
    #[error("Persistence error: {0}")]
    Persistence(#[from] tripmesh_common::Error),

    /// Job id unknown to the store
    #[error("Ingestion job {0} not found")]
    JobNotFound(Uuid),

    /// Status change not allowed by the job state machine
    #[error("Invalid job transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Progress recorded against a job that already finished
    #[error("Ingestion job {job_id} is already {status}")]
    JobFinished { job_id: Uuid, status: JobStatus },

    /// Background worker failed to run to completion
    #[error("Worker error: {0}")]
    Worker(String),
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Persistence(tripmesh_common::Error::Database(err))
    }
}

impl IngestError {
    /// True for transient SQLite lock contention worth retrying the batch
    pub fn is_lock_contention(&self) -> bool {
        match self {
            IngestError::Persistence(err) => err.is_lock_contention(),
            _ => false,
        }
    }
}

/// Result type for pipeline operations
pub type IngestResult<T> = Result<T, IngestError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Pipeline error
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// tripmesh-common error
    #[error("Common error: {0}")]
    Common(#[from] tripmesh_common::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Common(tripmesh_common::Error::Database(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Ingest(IngestError::JobNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Job not found: {}", id),
            ),
            ApiError::Ingest(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INGEST_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
