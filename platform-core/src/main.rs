//! # Host Platform Core binary
//!
//! Loads configuration, wires up every component (Token Service, Rate
//! Limiter, Lifecycle Store, Service Registry, Dependency Graph, Capability
//! Broker, Handshake Service, Launch Strategies, Platform Orchestrator), and
//! serves the wire surface of §6 over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! platform-core --config platform.toml
//! platform-core --host 0.0.0.0 --port 8080 --log-level debug
//! ```
//!
//! ## Environment Variables
//!
//! `HOSTCORE_*` variables override the loaded config file; see
//! [`platform_core::config::PlatformConfig::apply_env_overrides`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use platform_plugin_sdk::models::LaunchStrategyKind;

use platform_core::broker::CapabilityBroker;
use platform_core::config::PlatformConfig;
use platform_core::dependency_graph::DependencyGraph;
use platform_core::handshake::HandshakeService;
use platform_core::launch::{ExternalLaunchStrategy, InMemoryLaunchStrategy, LaunchStrategy, ProcessLaunchStrategy};
use platform_core::lifecycle::LifecycleStore;
use platform_core::orchestrator::{OrchestratorConfig, PlatformOrchestrator};
use platform_core::rate_limit::{self, RateLimiter};
use platform_core::registry::ServiceRegistry;
use platform_core::server::{build_router, AppState};
use platform_core::token::{self, TokenService};

/// Command line arguments for the host platform core server.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "platform.toml")]
    config: String,

    /// Overrides `server.host` from the config file.
    #[arg(long)]
    host: Option<String>,

    /// Overrides `server.port` from the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Logging level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt().with_env_filter(&args.log_level).init();

    let mut config = PlatformConfig::load(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let config = Arc::new(config);

    let tokens = TokenService::new();
    token::spawn_sweeper(tokens.clone(), std::time::Duration::from_secs(60));

    let rate_limiter = RateLimiter::new(config.rate_limit.idle_bucket_timeout());
    rate_limit::spawn_sweeper(rate_limiter.clone(), config.rate_limit.idle_bucket_timeout());

    let lifecycle = LifecycleStore::new();
    let graph = DependencyGraph::new();
    let registry = ServiceRegistry::new(lifecycle.clone(), config.registry.prefer_healthy, config.registry.default_selection_strategy);

    let host_base_url = format!("http://{}:{}", config.server.host, config.server.port);
    let broker = CapabilityBroker::new(tokens.clone(), config.broker.as_runtime_config(), host_base_url.clone());

    let handshake = HandshakeService::new(
        tokens.clone(),
        lifecycle.clone(),
        graph.clone(),
        config.handshake.as_runtime_config(config.token.runtime_token_ttl()),
    );

    let mut launchers: HashMap<LaunchStrategyKind, Arc<dyn LaunchStrategy>> = HashMap::new();
    launchers.insert(
        LaunchStrategyKind::Process,
        Arc::new(ProcessLaunchStrategy::new(config.launch.as_process_launch_config(Some(host_base_url.clone())))),
    );
    launchers.insert(LaunchStrategyKind::InMemory, Arc::new(InMemoryLaunchStrategy::new()));
    launchers.insert(LaunchStrategyKind::External, Arc::new(ExternalLaunchStrategy));

    let orchestrator = PlatformOrchestrator::new(
        launchers,
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

    let state = AppState {
        config: config.clone(),
        tokens,
        rate_limiter,
        lifecycle,
        graph,
        registry,
        broker,
        handshake,
        orchestrator,
    };

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("starting host platform core on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
