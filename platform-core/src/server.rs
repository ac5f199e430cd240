//! Axum wiring: `AppState`, the route table, and the middleware stack.
//!
//! Grounded on this file's own `AppState`/`create_server` shape (one `Arc`
//! per component, a layered stack ending in a `TimeoutLayer`), narrowed to
//! this platform's component set and generalized to merge in a second,
//! separately-state-typed router for the mediation path: `router.rs` needs
//! its own `RouterContext`, since an Axum `Router<S>` only supports one
//! state type until every route is resolved via `.with_state`, so the
//! mediation sub-router is built and resolved on its own before merging.

use std::sync::Arc;
use std::time::Duration;

use axum::middleware as axum_middleware;
use axum::routing::{any, get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;

use crate::broker::CapabilityBroker;
use crate::config::PlatformConfig;
use crate::dependency_graph::DependencyGraph;
use crate::handlers;
use crate::handshake::HandshakeService;
use crate::lifecycle::LifecycleStore;
use crate::middleware::{auth_middleware, cors_layer, logging_middleware};
use crate::orchestrator::PlatformOrchestrator;
use crate::rate_limit::RateLimiter;
use crate::registry::ServiceRegistry;
use crate::router::{route_request, RouterContext};
use crate::token::TokenService;

/// Shared state for every handler in `handlers.rs`.
pub struct AppState {
    pub config: Arc<PlatformConfig>,
    pub tokens: Arc<TokenService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub lifecycle: Arc<LifecycleStore>,
    pub graph: Arc<DependencyGraph>,
    pub registry: Arc<ServiceRegistry>,
    pub broker: Arc<CapabilityBroker>,
    pub handshake: Arc<HandshakeService>,
    pub orchestrator: Arc<PlatformOrchestrator>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            tokens: self.tokens.clone(),
            rate_limiter: self.rate_limiter.clone(),
            lifecycle: self.lifecycle.clone(),
            graph: self.graph.clone(),
            registry: self.registry.clone(),
            broker: self.broker.clone(),
            handshake: self.handshake.clone(),
            orchestrator: self.orchestrator.clone(),
        }
    }
}

/// Builds the full app: `Handshake`/`health` (unauthenticated), the
/// authenticated wire surface of §6, and the mediation sub-router, under a
/// shared CORS/logging/timeout stack.
pub fn build_router(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);
    let cors = cors_layer(&state.config.server.cors_allowed_origins);
    let mediation_root = state.config.server.mediation_root.clone();

    let router_ctx = Arc::new(RouterContext {
        tokens: state.tokens.clone(),
        rate_limiter: state.rate_limiter.clone(),
        lifecycle: state.lifecycle.clone(),
        http: reqwest::Client::new(),
        routed_policy: state.config.rate_limit.routed.as_policy(),
    });
    let mediation = Router::new()
        .route(
            &format!("{mediation_root}/:service_type/:provider_runtime_id/*rest"),
            any(route_request),
        )
        .with_state(router_ctx);

    let authenticated = Router::new()
        .route("/lifecycle/report-health", post(handlers::report_health))
        .route("/registry/register", post(handlers::register_service))
        .route("/registry/unregister", post(handlers::unregister_service))
        .route("/registry/discover", get(handlers::discover_service))
        .route("/registry/watch", get(handlers::watch_service))
        .route("/broker/request-capability", post(handlers::request_capability))
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    let unauthenticated = Router::new()
        .route("/handshake", post(handlers::handshake))
        .route("/health", get(handlers::health_check));

    let app = unauthenticated.merge(authenticated).with_state(state);

    app.merge(mediation)
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(cors)
        .layer(TimeoutLayer::new(request_timeout))
}
