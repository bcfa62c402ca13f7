use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use graphsync_core::error::CoreError;
use graphsync_core::graph::GraphSnapshot;
use graphsync_core::store::{CommitRejection, VERSION_CONFLICT};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds the store's not-found and
/// version-conflict outcomes.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `graphsync_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Graph not found: {0}")]
    NotFound(String),

    /// A save named a version other than the stored one. Carries the
    /// stored copy so the client can surface it.
    #[error("Version conflict: server holds version {}", .0.version)]
    VersionConflict(Box<GraphSnapshot>),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<CommitRejection> for AppError {
    fn from(rejection: CommitRejection) -> Self {
        match rejection {
            CommitRejection::VersionConflict(current) => AppError::VersionConflict(current),
            CommitRejection::Invalid(e) => AppError::Core(e),
            CommitRejection::NotFound(name) => AppError::NotFound(name),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::UnknownNode(_)
                | CoreError::DuplicateNode(_)
                | CoreError::DanglingEdge { .. } => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", core.to_string())
                }
            },

            AppError::NotFound(name) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Graph {name} not found"),
            ),

            AppError::VersionConflict(current) => {
                let body = json!({
                    "error": self.to_string(),
                    "code": VERSION_CONFLICT,
                    "current": current,
                });
                return (StatusCode::CONFLICT, axum::Json(body)).into_response();
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
