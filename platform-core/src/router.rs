//! Service Router (§4.9): the single mediation path through which all
//! plugin-to-plugin traffic flows.
//!
//! Grounded on `middleware/mod.rs`'s `auth_middleware` (concurrent token and
//! rate-limit check ahead of a forward, JSON error body on rejection) and
//! `server.rs`'s middleware-layering order, generalized from "forward to one
//! configured upstream" to "forward to the provider named in the path,
//! gated on live health".

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::response::{IntoResponse, Response};

use crate::error::PlatformError;
use crate::lifecycle::LifecycleStore;
use crate::rate_limit::{RateLimitPolicy, RateLimiter};
use crate::token::TokenService;

pub struct RouterContext {
    pub tokens: Arc<TokenService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub lifecycle: Arc<LifecycleStore>,
    pub http: reqwest::Client,
    pub routed_policy: RateLimitPolicy,
}

/// `axum::Router` handler mounted at `/<mediation-root>/:service_type/:provider_runtime_id/*rest`.
/// Implements the eight-step request discipline of §4.9 in order.
pub async fn route_request(
    Path((service_type, provider_runtime_id, rest)): Path<(String, String, String)>,
    State(ctx): State<Arc<RouterContext>>,
    request: Request<Body>,
) -> Response {
    match forward(&ctx, &service_type, &provider_runtime_id, &rest, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn forward(
    ctx: &RouterContext,
    service_type: &str,
    provider_runtime_id: &str,
    rest: &str,
    request: Request<Body>,
) -> Result<Response, PlatformError> {
    let started = Instant::now();
    let (parts, body) = request.into_parts();

    // Step 1: extract caller identity and token.
    let caller_runtime_id = header_str(&parts.headers, "x-plugin-runtime-id").ok_or_else(|| PlatformError::Unauthenticated {
        message: "missing X-Plugin-Runtime-ID header".to_string(),
    })?;
    let token = bearer_token(&parts.headers).ok_or_else(|| PlatformError::Unauthenticated {
        message: "missing or malformed Authorization header".to_string(),
    })?;

    // Step 2: validate the token, bound to the caller's claimed identity.
    ctx.tokens.validate_bound_to(&token, &caller_runtime_id)?;

    // Step 3: rate limit by caller.
    ctx.rate_limiter.allow(&caller_runtime_id, ctx.routed_policy)?;

    // Step 4: look up the named provider.
    let provider = ctx.lifecycle.get(provider_runtime_id).await.ok_or_else(|| PlatformError::NotFound {
        message: format!("unknown provider '{provider_runtime_id}'"),
    })?;

    // Step 5: gate on live routability.
    if !provider.is_routable() {
        return Err(PlatformError::Unavailable {
            message: format!(
                "provider '{provider_runtime_id}' is not routable (state: {})",
                provider.health.state
            ),
        });
    }
    let endpoint_path = provider
        .provides
        .iter()
        .find(|s| s.service_type == service_type)
        .map(|s| s.endpoint_path.clone())
        .ok_or_else(|| PlatformError::NotFound {
            message: format!("provider '{provider_runtime_id}' does not provide '{service_type}'"),
        })?;

    // Step 6: compose the target path (and, for the non-duplex case, the full URL).
    let rest = rest.trim_start_matches('/');
    let query = parts.uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    let target_path = format!("{endpoint_path}/{rest}{query}");

    // Step 7: reverse-proxy, streaming the body without buffering.
    let mut outbound_headers = parts.headers.clone();
    outbound_headers.remove("x-plugin-runtime-id");
    outbound_headers.remove("authorization");
    outbound_headers.insert(
        "x-forwarded-for-plugin",
        HeaderValue::from_str(&caller_runtime_id).map_err(|_| PlatformError::Internal {
            message: "caller_runtime_id is not a valid header value".to_string(),
        })?,
    );

    if let Some(transport) = &provider.transport {
        outbound_headers.insert(axum::http::header::HOST, HeaderValue::from_static(crate::launch::IN_MEMORY_HOST));
        let outbound_request = Request::builder()
            .method(parts.method.clone())
            .uri(&target_path)
            .body(body)
            .map_err(|e| PlatformError::Internal {
                message: format!("failed to build in-memory proxy request: {e}"),
            })?;
        let (mut outbound_request_parts, outbound_request_body) = outbound_request.into_parts();
        outbound_request_parts.headers = outbound_headers;
        let outbound_request = Request::from_parts(outbound_request_parts, outbound_request_body);

        let result = transport.send(outbound_request).await;
        let status = match &result {
            Ok(resp) => resp.status().as_u16(),
            Err(_) => 503,
        };
        tracing::info!(
            caller = %caller_runtime_id,
            provider = %provider_runtime_id,
            service_type = %service_type,
            method = %parts.method,
            status,
            duration_ms = started.elapsed().as_millis() as u64,
            "routed request (in-memory)"
        );
        let upstream = result?;
        let (upstream_parts, upstream_body) = upstream.into_parts();
        let mut response_builder = Response::builder().status(upstream_parts.status);
        for (name, value) in upstream_parts.headers.iter() {
            response_builder = response_builder.header(name, value);
        }
        return response_builder.body(Body::new(upstream_body)).map_err(|e| PlatformError::Internal {
            message: format!("failed to build proxied response: {e}"),
        });
    }

    let target_url = format!("{}{}", provider.base_url, target_path);
    let outbound = ctx
        .http
        .request(parts.method.clone(), &target_url)
        .headers(outbound_headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()));

    let result = outbound.send().await;

    let status = match &result {
        Ok(resp) => resp.status().as_u16(),
        Err(_) => 503,
    };
    tracing::info!(
        caller = %caller_runtime_id,
        provider = %provider_runtime_id,
        service_type = %service_type,
        method = %parts.method,
        status,
        duration_ms = started.elapsed().as_millis() as u64,
        "routed request"
    );

    let upstream = result.map_err(|e| PlatformError::Unavailable {
        message: format!("proxy to provider '{provider_runtime_id}' failed: {e}"),
    })?;

    let mut response_builder = Response::builder().status(upstream.status());
    for (name, value) in upstream.headers() {
        response_builder = response_builder.header(name, value);
    }
    let body = Body::from_stream(upstream.bytes_stream());
    response_builder.body(body).map_err(|e| PlatformError::Internal {
        message: format!("failed to build proxied response: {e}"),
    })
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}
