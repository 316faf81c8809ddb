//! Error types for stagelab-ingest
//!
//! [`PipelineError`] follows the stage taxonomy: per-item failures
//! (`Upload`, `Resolution`, unreadable archive entries) are absorbed inside
//! their stage and only logged; session-wide failures (`Session`, `Dispatch`,
//! `Commit`) are returned to the caller as retryable alerts.
//!
//! [`ApiError`] maps both onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use stagelab_common::ItemStatus;
use thiserror::Error;
use uuid::Uuid;

/// Pipeline stage errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Session could not be created or fetched; blocks new submissions
    #[error("Session unavailable: {0}")]
    Session(String),

    /// Nothing usable could be ingested from the submitted files
    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    /// One item's transfer failed
    #[error("Upload failed for {filename}: {message}")]
    Upload { filename: String, message: String },

    /// Job dispatcher did not accept the analysis trigger
    #[error("Analysis dispatch rejected: {0}")]
    Dispatch(String),

    /// Filename assist service failed
    #[error("Filename resolution failed: {0}")]
    Resolution(String),

    /// Log insert or subject resolution failed; items stay `complete`
    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Invalid status transition for item {local_id}: {from} -> {to}")]
    InvalidTransition {
        local_id: Uuid,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("Item {local_id} already has remote id {existing}")]
    RemoteIdConflict { local_id: Uuid, existing: Uuid },

    #[error("Item not found: {0}")]
    ItemNotFound(Uuid),

    #[error(transparent)]
    Common(#[from] stagelab_common::Error),
}

impl PipelineError {
    /// Whether the caller may simply try the same operation again
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Session(_)
            | PipelineError::Upload { .. }
            | PipelineError::Dispatch(_)
            | PipelineError::Resolution(_)
            | PipelineError::Commit(_) => true,
            PipelineError::Ingestion(_)
            | PipelineError::InvalidTransition { .. }
            | PipelineError::RemoteIdConflict { .. }
            | PipelineError::ItemNotFound(_) => false,
            PipelineError::Common(err) => matches!(
                err,
                stagelab_common::Error::Remote { .. }
                    | stagelab_common::Error::Io(_)
                    | stagelab_common::Error::Database(_)
            ),
        }
    }

    /// Session-wide failures the operator must see; the rest stay per-item
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            PipelineError::Session(_) | PipelineError::Dispatch(_) | PipelineError::Commit(_)
        )
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Pipeline stage error
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, retryable) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, false),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, false),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, false),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg, false)
            }
            ApiError::Pipeline(ref err) => {
                let (status, code) = match err {
                    PipelineError::Session(_) => (StatusCode::SERVICE_UNAVAILABLE, "SESSION_UNAVAILABLE"),
                    PipelineError::Ingestion(_) => (StatusCode::UNPROCESSABLE_ENTITY, "NO_IMAGES"),
                    PipelineError::Dispatch(_) => (StatusCode::BAD_GATEWAY, "DISPATCH_REJECTED"),
                    PipelineError::Commit(_) => (StatusCode::BAD_GATEWAY, "COMMIT_FAILED"),
                    PipelineError::Upload { .. } | PipelineError::Resolution(_) => {
                        (StatusCode::BAD_GATEWAY, "REMOTE_ERROR")
                    }
                    PipelineError::InvalidTransition { .. } | PipelineError::RemoteIdConflict { .. } => {
                        (StatusCode::CONFLICT, "CONFLICT")
                    }
                    PipelineError::ItemNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    PipelineError::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
                };
                (status, code, err.to_string(), err.is_retryable())
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "retryable": retryable,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
