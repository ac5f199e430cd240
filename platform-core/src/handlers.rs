//! Axum handlers for the host's plugin-facing wire surface (§6): `Handshake`,
//! `ReportHealth`, `RegisterService`, `UnregisterService`, `DiscoverService`,
//! `WatchService`, and `RequestCapability`. Each is a thin `Result<Json<T>,
//! PlatformError>` wrapper over the corresponding component, following the
//! repository's one-error-enum-to-`IntoResponse` convention (§7) rather than
//! per-endpoint ad hoc error JSON construction.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::request::Parts;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::Stream;
use platform_plugin_sdk::models::{
    DiscoverServiceQuery, DiscoverServiceResponse, HandshakeRequest, HandshakeResponse, RegisterServiceRequest,
    ReportHealthRequest, RequestCapabilityRequest, CapabilityGrantResponse, UnregisterServiceRequest,
};
use serde_json::json;

use crate::error::PlatformError;
use crate::middleware::require_caller;
use crate::server::AppState;

pub async fn handshake(
    State(state): State<AppState>,
    Json(request): Json<HandshakeRequest>,
) -> Result<Json<HandshakeResponse>, PlatformError> {
    state.rate_limiter.allow("handshake", state.config.rate_limit.handshake.as_policy())?;
    let response = state.handshake.handshake(request).await?;
    Ok(Json(response))
}

pub async fn report_health(
    parts: Parts,
    State(state): State<AppState>,
    Json(request): Json<ReportHealthRequest>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    let runtime_id = require_caller(&parts)?;
    state
        .rate_limiter
        .allow(&runtime_id, state.config.rate_limit.routed.as_policy())?;
    state
        .lifecycle
        .report_health(&runtime_id, request.state, request.reason, request.unavailable_deps)
        .await?;
    Ok(Json(json!({"ok": true})))
}

pub async fn register_service(
    parts: Parts,
    State(state): State<AppState>,
    Json(request): Json<RegisterServiceRequest>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    let runtime_id = require_caller(&parts)?;
    state
        .rate_limiter
        .allow(&runtime_id, state.config.rate_limit.register.as_policy())?;
    crate::validator::validate_metadata(&request.metadata)?;
    state
        .registry
        .register(&runtime_id, &request.service_type, &request.version, &request.endpoint_path)
        .await?;
    Ok(Json(json!({"ok": true})))
}

pub async fn unregister_service(
    parts: Parts,
    State(state): State<AppState>,
    Json(request): Json<UnregisterServiceRequest>,
) -> Result<Json<serde_json::Value>, PlatformError> {
    let runtime_id = require_caller(&parts)?;
    state.registry.unregister(&runtime_id, &request.service_type, &request.version).await;
    Ok(Json(json!({"ok": true})))
}

pub async fn discover_service(
    parts: Parts,
    State(state): State<AppState>,
    Query(query): Query<DiscoverServiceQuery>,
) -> Result<Json<DiscoverServiceResponse>, PlatformError> {
    let runtime_id = require_caller(&parts)?;
    state
        .rate_limiter
        .allow(&runtime_id, state.config.rate_limit.register.as_policy())?;
    let outcome = state.registry.discover(&query.service_type, &query.min_version).await?;
    Ok(Json(DiscoverServiceResponse {
        endpoint_url: format!(
            "{}/{}/{}",
            state.config.server.mediation_root.trim_end_matches('/'),
            query.service_type,
            outcome.runtime_id
        ),
        provider_runtime_id: outcome.runtime_id,
        selected_degraded: outcome.selected_degraded,
    }))
}

/// `WatchService` (§6): a lazy server-sent-event stream of `AVAILABLE`/
/// `UNAVAILABLE` transitions for the requested service type, implemented via
/// `axum::response::Sse` per §6's streaming note.
pub async fn watch_service(
    parts: Parts,
    State(state): State<AppState>,
    Query(query): Query<DiscoverServiceQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, PlatformError> {
    require_caller(&parts)?;
    let mut receiver = state.registry.watch(&query.service_type).await;
    let stream = async_stream::stream! {
        while let Some(event) = receiver.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                yield Ok(Event::default().data(json));
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

pub async fn request_capability(
    parts: Parts,
    State(state): State<AppState>,
    Json(request): Json<RequestCapabilityRequest>,
) -> Result<Json<CapabilityGrantResponse>, PlatformError> {
    let runtime_id = require_caller(&parts)?;
    state
        .rate_limiter
        .allow(&runtime_id, state.config.rate_limit.capability.as_policy())?;
    let grant = state.broker.request_capability(
        &runtime_id,
        &request.capability_type,
        request.min_version.as_deref(),
        request.reason.as_deref(),
    )?;
    Ok(Json(CapabilityGrantResponse {
        grant_id: grant.grant_id,
        endpoint_url: grant.endpoint_url,
        bearer_token: grant.bearer_token,
        expires_at: grant.expires_at,
    }))
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}
