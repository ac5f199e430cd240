//! # Host Platform Core
//!
//! A plugin framework that composes functionality from independent,
//! network-reachable plugin processes over RPC. Plugins admit themselves (or
//! are launched and admitted) through a handshake, report health, register
//! and discover each other's services, request time-limited capability
//! grants, and exchange traffic through a single mediated router — all
//! without trusting each other directly.
//!
//! ## Architecture
//!
//! - **`token`**: mints and validates the bearer tokens every authenticated
//!   call carries (runtime tokens and capability grants).
//! - **`rate_limit`**: per-caller token-bucket limiting, one policy per
//!   endpoint class.
//! - **`validator`**: boundary validation for every field a plugin controls.
//! - **`lifecycle`**: the admitted-plugin table and health-state machine.
//! - **`registry`**: service registration, discovery, and `WatchService`.
//! - **`dependency_graph`**: tracks `requires`/`provides` edges and startup
//!   ordering.
//! - **`broker`**: the Capability Broker, granting scoped access to
//!   host-provided services.
//! - **`handshake`**: the single admission entry point, §4.4.
//! - **`launch`**: pluggable start/stop of a plugin instance (`Process`,
//!   `InMemory`, `External`).
//! - **`orchestrator`**: `AddPlugin`/`RemovePlugin`/`ReplacePlugin` lifecycle
//!   management, managed-mode handshakes.
//! - **`router`**: the mediated plugin-to-plugin request path, §4.9.
//! - **`selection`**: provider-selection strategies for discovery.
//! - **`config`**: TOML configuration, environment overrides, validation.
//! - **`caller_context`** / **`middleware`** / **`handlers`** / **`server`**:
//!   the HTTP surface tying every component together.
//! - **`error`**: the one error taxonomy every component raises into.
//! - **`plugin`**: the admitted-plugin record shared across components.
//!
//! ## Quick Start
//!
//! ```no_run
//! use platform_core::config::PlatformConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PlatformConfig::load("platform.toml")?;
//!     // see `main.rs` for full component wiring
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod caller_context;
pub mod config;
pub mod dependency_graph;
pub mod error;
pub mod handlers;
pub mod handshake;
pub mod launch;
pub mod lifecycle;
pub mod middleware;
pub mod orchestrator;
pub mod plugin;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod selection;
pub mod server;
pub mod token;
pub mod validator;

pub use server::build_router;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::CapabilityBroker;
    use crate::config::PlatformConfig;
    use crate::dependency_graph::DependencyGraph;
    use crate::handshake::HandshakeService;
    use crate::lifecycle::LifecycleStore;
    use crate::orchestrator::{OrchestratorConfig, PlatformOrchestrator};
    use crate::rate_limit::RateLimiter;
    use crate::registry::ServiceRegistry;
    use crate::server::AppState;
    use crate::token::TokenService;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use std::collections::HashMap;

    fn test_state() -> AppState {
        let mut config = PlatformConfig::default();
        config.handshake.magic_cookie = "test-cookie".to_string();
        let config = std::sync::Arc::new(config);

        let tokens = TokenService::new();
        let lifecycle = LifecycleStore::new();
        let graph = DependencyGraph::new();
        let registry = ServiceRegistry::new(lifecycle.clone(), config.registry.prefer_healthy, config.registry.default_selection_strategy);
        let broker = CapabilityBroker::new(tokens.clone(), config.broker.as_runtime_config(), "http://127.0.0.1:8080".to_string());
        let handshake = HandshakeService::new(
            tokens.clone(),
            lifecycle.clone(),
            graph.clone(),
            config.handshake.as_runtime_config(config.token.runtime_token_ttl()),
        );
        let orchestrator = PlatformOrchestrator::new(
            HashMap::new(),
            tokens.clone(),
            lifecycle.clone(),
            graph.clone(),
            registry.clone(),
            OrchestratorConfig {
                admit_deadline: config.launch.admit_deadline(),
                drain_grace: config.launch.drain_grace(),
                runtime_token_ttl: config.token.runtime_token_ttl(),
                poll_interval: config.launch.poll_interval(),
            },
        );

        AppState {
            config: config.clone(),
            tokens,
            rate_limiter: RateLimiter::new(config.rate_limit.idle_bucket_timeout()),
            lifecycle,
            graph,
            registry,
            broker,
            handshake,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = build_router(test_state());
        let server = TestServer::new(app).unwrap();
        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn handshake_endpoint_mints_a_runtime_identity() {
        let app = build_router(test_state());
        let server = TestServer::new(app).unwrap();
        let response = server
            .post("/handshake")
            .json(&serde_json::json!({
                "self_id": "logger",
                "self_version": "1.0.0",
                "provides": [],
                "requires": [],
                "core_protocol_version": "1.0",
                "magic_cookie": "test-cookie",
                "endpoint_base_url": "http://127.0.0.1:9001",
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<serde_json::Value>();
        assert!(body["runtime_token"].is_string());
    }

    #[tokio::test]
    async fn registry_endpoint_rejects_unauthenticated_callers() {
        let app = build_router(test_state());
        let server = TestServer::new(app).unwrap();
        let response = server
            .get("/registry/discover")
            .add_query_param("type", "storage")
            .add_query_param("min_version", "1.0.0")
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }
}
