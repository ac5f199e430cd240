//! HTTP middleware: request tracing and the uniform bearer-token auth check
//! every plugin-facing endpoint except `Handshake` requires (§6 Headers).
//!
//! Grounded on `middleware/mod.rs`'s `logging_middleware`/`auth_middleware`
//! shape (extract header, validate, inject request-scoped context), narrowed
//! from API-key auth to runtime-token auth and from a config-gated `enabled`
//! flag to always-on (the spec has no "auth disabled" posture).

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{self, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_http::cors::{Any, CorsLayer};

use crate::caller_context::CallerContext;
use crate::error::PlatformError;
use crate::server::AppState;

/// Logs method, path, status, and latency for every request, tagged with
/// the `request_id` the auth middleware (or a default context) assigned.
pub async fn logging_middleware(req: http::Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = next.run(req).await;

    let latency = start.elapsed();
    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        latency_ms = latency.as_millis(),
        "request processed"
    );

    response
}

/// Validates `X-Plugin-Runtime-ID` + `Authorization: Bearer <runtime_token>`
/// (§6 Headers) and injects a [`CallerContext`] carrying the validated
/// runtime_id into request extensions. Rejects with `unauthenticated` on any
/// missing, malformed, or non-matching credential — collapsing "unknown" and
/// "expired" into one message per §7's anti-oracle-leakage policy.
pub async fn auth_middleware(State(state): State<AppState>, mut req: http::Request<Body>, next: Next) -> Response {
    if req.method() == http::Method::OPTIONS {
        return next.run(req).await;
    }

    match authenticate(&state, req.headers()) {
        Ok(runtime_id) => {
            req.extensions_mut().insert(CallerContext::with_caller(Some(runtime_id)));
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, PlatformError> {
    let runtime_id = headers
        .get("x-plugin-runtime-id")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| PlatformError::Unauthenticated {
            message: "missing X-Plugin-Runtime-ID header".to_string(),
        })?;

    let token = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| PlatformError::Unauthenticated {
            message: "missing or malformed Authorization header".to_string(),
        })?;

    state.tokens.validate_bound_to(&token, &runtime_id)?;
    Ok(runtime_id)
}

pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let mut cors = CorsLayer::new();
    if allowed_origins.iter().any(|o| o == "*") {
        cors = cors.allow_origin(Any);
    } else {
        for origin in allowed_origins {
            if let Ok(value) = origin.parse::<http::HeaderValue>() {
                cors = cors.allow_origin(value);
            }
        }
    }
    cors.allow_methods(Any).allow_headers(Any)
}

/// Shared by handlers that need the validated caller but receive no
/// extension (e.g. a test calling the handler fn directly) — returns
/// `unauthenticated` rather than panicking on a missing extension.
pub fn require_caller(parts: &http::request::Parts) -> Result<String, PlatformError> {
    parts
        .extensions
        .get::<CallerContext>()
        .and_then(|ctx| ctx.caller_runtime_id.clone())
        .ok_or_else(|| PlatformError::Unauthenticated {
            message: "request was not authenticated".to_string(),
        })
}
