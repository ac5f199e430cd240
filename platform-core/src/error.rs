//! Error taxonomy for the host platform core.
//!
//! `PlatformError` carries one variant per error *kind* (not per component);
//! components classify at the point a failure is raised and never re-wrap in
//! a way that loses the kind. `IntoResponse` performs the kind → HTTP status
//! mapping documented alongside the error kinds themselves.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String },

    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    /// Same `runtime_id` re-registering an already-present `(service_type, version)`.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// No provider healthy enough to route to; includes what's missing so the
    /// caller can usefully observe why (e.g. a cycle or an unresolved dependency).
    #[error("failed precondition: {message}")]
    FailedPrecondition { message: String },

    #[error("resource exhausted: {message}")]
    ResourceExhausted { message: String },

    #[error("unavailable: {message}")]
    Unavailable { message: String },

    #[error("deadline exceeded: {message}")]
    DeadlineExceeded { message: String },

    /// Host bug. Never constructed from validated, expected input paths.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl PlatformError {
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformError::InvalidArgument { .. } => "invalid_argument",
            PlatformError::Unauthenticated { .. } => "unauthenticated",
            PlatformError::PermissionDenied { .. } => "permission_denied",
            PlatformError::NotFound { .. } => "not_found",
            PlatformError::Conflict { .. } => "conflict",
            PlatformError::FailedPrecondition { .. } => "failed_precondition",
            PlatformError::ResourceExhausted { .. } => "resource_exhausted",
            PlatformError::Unavailable { .. } => "unavailable",
            PlatformError::DeadlineExceeded { .. } => "deadline_exceeded",
            PlatformError::Internal { .. } => "internal",
        }
    }

    /// Per §7: whether a caller should retry after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::Unavailable { .. }
                | PlatformError::DeadlineExceeded { .. }
                | PlatformError::ResourceExhausted { .. }
                | PlatformError::Internal { .. }
        )
    }

    fn status(&self) -> StatusCode {
        match self {
            PlatformError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            PlatformError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            PlatformError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            PlatformError::NotFound { .. } => StatusCode::NOT_FOUND,
            PlatformError::Conflict { .. } => StatusCode::CONFLICT,
            PlatformError::FailedPrecondition { .. } => StatusCode::CONFLICT,
            PlatformError::ResourceExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            PlatformError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            PlatformError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            PlatformError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PlatformError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "kind": kind,
                "code": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}
