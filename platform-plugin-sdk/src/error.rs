//! Error types for plugins calling back into the host.
//!
//! [`ClientError`] mirrors the host's error-kind taxonomy (see `platform-core`'s
//! `PlatformError`) so a plugin can match on the same kinds the host documents,
//! without depending on the host crate.

use thiserror::Error;

/// Errors returned by [`crate::client::PluginClient`] operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP transport failure reaching the host.
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The host rejected a request as malformed (`invalid_argument`).
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Missing, expired, or mismatched runtime/grant token (`unauthenticated`).
    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String },

    /// Authenticated but not authorized for the requested operation (`permission_denied`).
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// Unknown provider or service type (`not_found`).
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Same runtime_id re-registered an already-present `(service_type, version)` (`conflict`).
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// No healthy-enough provider is available yet (`failed_precondition`).
    #[error("failed precondition: {message}")]
    FailedPrecondition { message: String },

    /// The host's rate limiter denied the call (`resource_exhausted`).
    #[error("rate limited: {message}")]
    ResourceExhausted { message: String },

    /// Provider unreachable or not currently routable (`unavailable`).
    #[error("unavailable: {message}")]
    Unavailable { message: String },

    /// Call exceeded its deadline (`deadline_exceeded`).
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Unclassified host-side failure (`internal`).
    #[error("internal error: {message}")]
    Internal { message: String },

    /// Invalid client configuration (base URL, missing token, etc).
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl ClientError {
    /// Build a [`ClientError`] from an HTTP status code and the host's JSON
    /// error body, classifying by status the way the host's `IntoResponse`
    /// impl maps kinds to codes. `Conflict` and `FailedPrecondition` share
    /// status 409, so callers that have the body's `"kind"` field should
    /// prefer [`ClientError::from_kind_and_status`] instead.
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        Self::from_kind_and_status(None, status, message)
    }

    /// Same as [`ClientError::from_status`], but classifies by the host
    /// error body's `"kind"` field first when it names a recognized kind,
    /// falling back to the status-only mapping otherwise.
    pub fn from_kind_and_status(kind: Option<&str>, status: reqwest::StatusCode, message: String) -> Self {
        use reqwest::StatusCode as S;
        match kind {
            Some("invalid_argument") => return ClientError::InvalidArgument { message },
            Some("unauthenticated") => return ClientError::Unauthenticated { message },
            Some("permission_denied") => return ClientError::PermissionDenied { message },
            Some("not_found") => return ClientError::NotFound { message },
            Some("conflict") => return ClientError::Conflict { message },
            Some("failed_precondition") => return ClientError::FailedPrecondition { message },
            Some("resource_exhausted") => return ClientError::ResourceExhausted { message },
            Some("unavailable") => return ClientError::Unavailable { message },
            Some("deadline_exceeded") => return ClientError::DeadlineExceeded,
            Some("internal") => return ClientError::Internal { message },
            _ => {}
        }
        match status {
            S::BAD_REQUEST => ClientError::InvalidArgument { message },
            S::UNAUTHORIZED => ClientError::Unauthenticated { message },
            S::FORBIDDEN => ClientError::PermissionDenied { message },
            S::NOT_FOUND => ClientError::NotFound { message },
            S::CONFLICT => ClientError::FailedPrecondition { message },
            S::TOO_MANY_REQUESTS => ClientError::ResourceExhausted { message },
            S::SERVICE_UNAVAILABLE => ClientError::Unavailable { message },
            S::GATEWAY_TIMEOUT => ClientError::DeadlineExceeded,
            _ => ClientError::Internal { message },
        }
    }

    /// Whether a caller following the host's documented retry policy should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Unavailable { .. }
                | ClientError::DeadlineExceeded
                | ClientError::ResourceExhausted { .. }
                | ClientError::Internal { .. }
        )
    }
}
