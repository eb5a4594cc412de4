use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::candidates::RecordError;
use crate::queue::QueueError;
use crate::storage::StorageError;
use crate::tasks::StoreError;

/// Error returned by every HTTP handler. Stores and ports convert into it with
/// `?`; the response body is `{"error": {"code", "message"}}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The target entity is not in a state that allows the operation.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::NotFound(format!("Task {id} not found")),
            StoreError::InvalidTransition { task_id, from, to } => AppError::PreconditionFailed(
                format!("Task {task_id} is {from} and cannot become {to}"),
            ),
            StoreError::Database(e) => AppError::Database(e),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<RecordError> for AppError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::CvNotFound(id) => AppError::NotFound(format!("CV {id} not found")),
            RecordError::Database(e) => AppError::Database(e),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl AppError {
    /// Status, stable error code and client-facing message. Collaborator
    /// failures are logged here and reported generically.
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::PreconditionFailed(msg) => {
                (StatusCode::PRECONDITION_FAILED, "PRECONDITION_FAILED", msg.clone())
            }
            AppError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", "Access denied".into()),
            AppError::Database(e) => server_fault("DATABASE_ERROR", "A database error occurred", e),
            AppError::Queue(e) => server_fault("QUEUE_ERROR", "A queue error occurred", e),
            AppError::Storage(e) => server_fault("STORAGE_ERROR", "A storage error occurred", e),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".into(),
                )
            }
        }
    }
}

fn server_fault(
    code: &'static str,
    message: &str,
    cause: &dyn std::fmt::Display,
) -> (StatusCode, &'static str, String) {
    tracing::error!(code, "{cause}");
    (StatusCode::INTERNAL_SERVER_ERROR, code, message.to_string())
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = json!({ "error": { "code": code, "message": message } });
        (status, Json(body)).into_response()
    }
}
