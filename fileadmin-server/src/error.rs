use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Request-boundary error. Every domain error is converted into one of these
/// before it crosses the dispatch boundary; the JSON body is always the
/// `{success: false, data: <message>}` envelope.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Invalid path")]
    PathInvalid,

    #[error("{0}")]
    NotFound(String),

    #[error("'{0}' already exists")]
    AlreadyExists(String),

    #[error("A file or folder with that name already exists")]
    TargetExists,

    #[error("{0}")]
    DisallowedType(String),

    #[error("{0}")]
    TooLarge(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("A backup is already running. Please wait a moment and try again.")]
    LockBusy,

    #[error("{0}")]
    QueryError(String),

    /// Restore aborted mid-script; carries how far it got.
    #[error("Restore failed after {executed} statement(s): {message}")]
    PartialRestore { executed: usize, message: String },

    /// One backup part failed; artifacts already written are kept.
    #[error("Backup part '{failed_part}' failed: {message}")]
    PartialBackup {
        completed: Vec<String>,
        failed_part: String,
        message: String,
    },

    /// Storage I/O failure. The underlying error is logged, never surfaced.
    #[error("Write failed")]
    WriteFailed(#[source] std::io::Error),

    #[error("Read failed")]
    ReadFailed(#[source] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::PathInvalid => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::AlreadyExists(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::TargetExists => (StatusCode::CONFLICT, self.to_string()),
            AppError::DisallowedType(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            AppError::TooLarge(m) => (StatusCode::PAYLOAD_TOO_LARGE, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::PermissionDenied(m) => (StatusCode::FORBIDDEN, m.clone()),
            AppError::LockBusy => (StatusCode::CONFLICT, self.to_string()),
            AppError::QueryError(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::PartialRestore { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::PartialBackup { completed, .. } => {
                // The artifacts that did get written are part of the answer;
                // the caller decides whether to keep or retry.
                let msg = if completed.is_empty() {
                    self.to_string()
                } else {
                    format!("{} Completed artifacts: {}", self, completed.join(", "))
                };
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::WriteFailed(e) => {
                tracing::error!("Write failed: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Write failed".into())
            }
            AppError::ReadFailed(e) => {
                tracing::error!("Read failed: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Read failed".into())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "success": false, "data": msg }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_message_names_the_file() {
        let err = AppError::AlreadyExists("report.txt".to_string());
        assert_eq!(err.to_string(), "'report.txt' already exists");
    }
}
