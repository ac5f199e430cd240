//! Platform Orchestrator (§4.11): composes Launch, Handshake-equivalent
//! identity push, Lifecycle, Registry, and the Dependency Graph into
//! `AddPlugin` / `RemovePlugin` / `ReplacePlugin`, each with explicit
//! rollback or idempotency semantics.
//!
//! Grounded on `server.rs`'s `create_server` sequencing style (ordered async
//! initialization, bail out and unwind on the first failure) generalized
//! from "start the HTTP listener" to "stand up one plugin instance".
//! This path is the *managed* mode of §4.4/§6 (`PluginIdentity.GetPluginInfo`
//! / `SetRuntimeIdentity`, host-initiated); a plugin launched in
//! *self-register* mode (`HOST_URL` present, §6 "Plugin-side environment")
//! instead calls [`crate::handshake::HandshakeService`] directly and never
//! goes through `AddPlugin`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use platform_plugin_sdk::models::{
    GetPluginInfoResponse, LaunchStrategyKind, PluginSpec, SetRuntimeIdentityRequest,
};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dependency_graph::DependencyGraph;
use crate::error::PlatformError;
use crate::launch::{build_request, LaunchHandle, LaunchStrategy};
use crate::lifecycle::LifecycleStore;
use crate::plugin::{Health, PluginRecord};
use crate::registry::ServiceRegistry;
use crate::token::{TokenScope, TokenService};

pub struct OrchestratorConfig {
    pub admit_deadline: StdDuration,
    pub drain_grace: StdDuration,
    pub runtime_token_ttl: Duration,
    pub poll_interval: StdDuration,
}

pub struct PlatformOrchestrator {
    launchers: HashMap<LaunchStrategyKind, Arc<dyn LaunchStrategy>>,
    tokens: Arc<TokenService>,
    lifecycle: Arc<LifecycleStore>,
    graph: Arc<DependencyGraph>,
    registry: Arc<ServiceRegistry>,
    http: reqwest::Client,
    config: OrchestratorConfig,
    handles: RwLock<HashMap<String, LaunchHandle>>,
    /// One lock per `self_id`, so `AddPlugin` re-entered for the same
    /// `self_id` serializes instead of racing (§4.11 reentrancy rule).
    self_id_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl PlatformOrchestrator {
    pub fn new(
        launchers: HashMap<LaunchStrategyKind, Arc<dyn LaunchStrategy>>,
        tokens: Arc<TokenService>,
        lifecycle: Arc<LifecycleStore>,
        graph: Arc<DependencyGraph>,
        registry: Arc<ServiceRegistry>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            launchers,
            tokens,
            lifecycle,
            graph,
            registry,
            http: reqwest::Client::new(),
            config,
            handles: RwLock::new(HashMap::new()),
            self_id_locks: DashMap::new(),
        })
    }

    fn lock_for(&self, self_id: &str) -> Arc<AsyncMutex<()>> {
        self.self_id_locks.entry(self_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// `AddPlugin(spec)` (§4.11): launch, interrogate, mint identity, push
    /// it, wait for readiness, register in the dependency graph. Any failure
    /// after launch rolls every prior step back.
    pub async fn add_plugin(&self, spec: PluginSpec) -> Result<String, PlatformError> {
        let self_lock = self.lock_for(&spec.self_id);
        let _guard = self_lock.lock().await;

        let launcher = self.launchers.get(&spec.strategy).ok_or_else(|| PlatformError::InvalidArgument {
            message: format!("no launch strategy registered for {:?}", spec.strategy),
        })?;
        let launch_handle = launcher.launch(&spec).await?;

        match self.admit(&launch_handle).await {
            Ok(runtime_id) => {
                self.handles.write().await.insert(runtime_id.clone(), launch_handle);
                Ok(runtime_id)
            }
            Err(err) => {
                let _ = launch_handle.stop().await;
                Err(err)
            }
        }
    }

    async fn admit(&self, launch_handle: &LaunchHandle) -> Result<String, PlatformError> {
        let info = self.get_plugin_info(launch_handle).await?;

        let runtime_id = Uuid::new_v4().to_string();
        let (runtime_token, _expires_at) = self.tokens.mint(runtime_id.clone(), TokenScope::Runtime, self.config.runtime_token_ttl)?;

        if let Err(err) = self
            .set_runtime_identity(
                launch_handle,
                &SetRuntimeIdentityRequest {
                    runtime_id: runtime_id.clone(),
                    runtime_token: runtime_token.clone(),
                    available_capabilities: vec![],
                },
            )
            .await
        {
            self.tokens.revoke_all_for_runtime(&runtime_id);
            return Err(err);
        }

        self.lifecycle
            .insert(PluginRecord {
                self_id: info.self_id.clone(),
                runtime_id: runtime_id.clone(),
                provides: info.provides.clone(),
                requires: info.requires.clone(),
                health: Health::default(),
                base_url: launch_handle.endpoint_url.clone(),
                transport: launch_handle.transport.clone(),
                allowed_service_types: None::<HashSet<String>>,
                admitted_at: Utc::now(),
                quarantined: false,
            })
            .await;

        self.graph
            .add(
                &runtime_id,
                info.provides.iter().map(|s| s.service_type.clone()),
                info.requires.iter().filter(|d| d.required_for_startup).map(|d| d.service_type.clone()),
            )
            .await;

        if let Err(err) = self.wait_for_admission(&runtime_id, &info).await {
            self.rollback(&runtime_id).await;
            return Err(err);
        }

        Ok(runtime_id)
    }

    async fn all_declared_services_registered(&self, runtime_id: &str, info: &GetPluginInfoResponse) -> bool {
        for declared in &info.provides {
            // Best-effort: the registry only exposes discover(), not a raw listing,
            // so presence is checked by a successful discovery at any version floor.
            match self.registry.discover(&declared.service_type, "0.0.0").await {
                Ok(outcome) if outcome.runtime_id == runtime_id => {}
                _ => return false,
            }
        }
        true
    }

    async fn wait_for_admission(&self, runtime_id: &str, info: &GetPluginInfoResponse) -> Result<(), PlatformError> {
        let deadline = tokio::time::Instant::now() + self.config.admit_deadline;
        loop {
            let record = self.lifecycle.get(runtime_id).await;
            let healthy_enough = record.as_ref().is_some_and(PluginRecord::is_routable);
            if healthy_enough && self.all_declared_services_registered(runtime_id, info).await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PlatformError::DeadlineExceeded {
                    message: format!("plugin '{runtime_id}' did not reach HEALTHY/DEGRADED and fully registered within admit_deadline"),
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn rollback(&self, runtime_id: &str) {
        self.registry.unregister_all_for_runtime(runtime_id).await;
        self.tokens.revoke_all_for_runtime(runtime_id);
        self.graph.remove(runtime_id).await;
        self.lifecycle.remove(runtime_id).await;
    }

    /// `RemovePlugin(runtime_id)` (§4.11). Idempotent: a second call on an
    /// already-removed `runtime_id` is a no-op success (P6).
    pub async fn remove_plugin(&self, runtime_id: &str) -> Result<(), PlatformError> {
        if self.lifecycle.get(runtime_id).await.is_none() {
            return Ok(());
        }

        // Steps 1-2: mark UNHEALTHY, which publishes the transition to watchers.
        let _ = self
            .lifecycle
            .report_health(runtime_id, platform_plugin_sdk::models::HealthState::Unhealthy, Some("removal in progress".to_string()), vec![])
            .await;

        // Step 3: drain.
        tokio::time::sleep(self.config.drain_grace).await;

        // Step 4: unregister.
        self.registry.unregister_all_for_runtime(runtime_id).await;

        // Step 5: polite shutdown RPC, best-effort.
        if let Some(record) = self.lifecycle.get(runtime_id).await {
            match &record.transport {
                Some(transport) => {
                    if let Ok(request) = build_request(axum::http::Method::POST, "/control/shutdown", axum::body::Body::empty()) {
                        let _ = transport.send(request).await;
                    }
                }
                None => {
                    let _ = self.http.post(format!("{}/control/shutdown", record.base_url)).send().await;
                }
            }
        }

        // Step 6: stop the launch.
        if let Some(handle) = self.handles.write().await.remove(runtime_id) {
            handle.stop().await?;
        }

        // Steps 7-8.
        self.graph.remove(runtime_id).await;
        self.tokens.revoke_all_for_runtime(runtime_id);
        self.lifecycle.remove(runtime_id).await;
        Ok(())
    }

    /// `ReplacePlugin(runtime_id, new_spec)` (§4.11): blue-green. The new
    /// instance must reach HEALTHY/DEGRADED and register before the old one
    /// is drained; if the add fails, the old plugin is left untouched and
    /// remains authoritative.
    pub async fn replace_plugin(&self, old_runtime_id: &str, new_spec: PluginSpec) -> Result<String, PlatformError> {
        let new_runtime_id = self.add_plugin(new_spec).await?;
        self.remove_plugin(old_runtime_id).await?;
        Ok(new_runtime_id)
    }

    async fn get_plugin_info(&self, launch_handle: &LaunchHandle) -> Result<GetPluginInfoResponse, PlatformError> {
        if let Some(transport) = &launch_handle.transport {
            let request = build_request(axum::http::Method::GET, "/identity/info", axum::body::Body::empty())?;
            let (parts, body) = transport.send_buffered(request).await?;
            if !parts.status.is_success() {
                return Err(PlatformError::Unavailable {
                    message: format!("GetPluginInfo rejected with status {}", parts.status),
                });
            }
            return serde_json::from_slice(&body).map_err(|e| PlatformError::Internal {
                message: format!("malformed GetPluginInfo response: {e}"),
            });
        }

        let response = self
            .http
            .get(format!("{}/identity/info", launch_handle.endpoint_url))
            .send()
            .await
            .map_err(|e| PlatformError::Unavailable {
                message: format!("GetPluginInfo failed: {e}"),
            })?;
        response.json().await.map_err(|e| PlatformError::Internal {
            message: format!("malformed GetPluginInfo response: {e}"),
        })
    }

    async fn set_runtime_identity(&self, launch_handle: &LaunchHandle, request: &SetRuntimeIdentityRequest) -> Result<(), PlatformError> {
        if let Some(transport) = &launch_handle.transport {
            let payload = serde_json::to_vec(request).map_err(|e| PlatformError::Internal {
                message: format!("failed to serialize SetRuntimeIdentity request: {e}"),
            })?;
            let mut http_request = build_request(axum::http::Method::POST, "/identity/runtime", axum::body::Body::from(payload))?;
            http_request.headers_mut().insert(axum::http::header::CONTENT_TYPE, axum::http::HeaderValue::from_static("application/json"));
            let (parts, _body) = transport.send_buffered(http_request).await?;
            if !parts.status.is_success() {
                return Err(PlatformError::Unavailable {
                    message: format!("SetRuntimeIdentity rejected with status {}", parts.status),
                });
            }
            return Ok(());
        }

        let response = self
            .http
            .post(format!("{}/identity/runtime", launch_handle.endpoint_url))
            .json(request)
            .send()
            .await
            .map_err(|e| PlatformError::Unavailable {
                message: format!("SetRuntimeIdentity failed: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(PlatformError::Unavailable {
                message: format!("SetRuntimeIdentity rejected with status {}", response.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::InMemoryLaunchStrategy;
    use axum::extract::State as AxumState;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use platform_plugin_sdk::models::ServiceDeclaration;

    #[derive(Clone)]
    struct TestPluginState {
        registry: Arc<ServiceRegistry>,
        lifecycle: Arc<LifecycleStore>,
    }

    async fn get_info() -> Json<GetPluginInfoResponse> {
        Json(GetPluginInfoResponse {
            self_id: "echo-plugin".to_string(),
            self_version: "1.0.0".to_string(),
            provides: vec![ServiceDeclaration {
                service_type: "echo".to_string(),
                version: "1.0.0".to_string(),
                endpoint_path: "/echo".to_string(),
            }],
            requires: vec![],
        })
    }

    async fn set_runtime(AxumState(state): AxumState<TestPluginState>, Json(req): Json<SetRuntimeIdentityRequest>) -> axum::http::StatusCode {
        state.registry.register(&req.runtime_id, "echo", "1.0.0", "/echo").await.unwrap();
        state
            .lifecycle
            .report_health(&req.runtime_id, platform_plugin_sdk::models::HealthState::Healthy, None, vec![])
            .await
            .unwrap();
        axum::http::StatusCode::OK
    }

    async fn shutdown() -> axum::http::StatusCode {
        axum::http::StatusCode::OK
    }

    fn build_orchestrator() -> (Arc<PlatformOrchestrator>, Arc<LifecycleStore>) {
        let tokens = TokenService::new();
        let lifecycle = LifecycleStore::new();
        let graph = DependencyGraph::new();
        let registry = ServiceRegistry::new(lifecycle.clone(), true, crate::selection::SelectionStrategy::First);

        let plugin_state = TestPluginState {
            registry: registry.clone(),
            lifecycle: lifecycle.clone(),
        };
        let router = Router::new()
            .route("/identity/info", get(get_info))
            .route("/identity/runtime", post(set_runtime))
            .route("/control/shutdown", post(shutdown))
            .with_state(plugin_state);

        let mut launchers: HashMap<LaunchStrategyKind, Arc<dyn LaunchStrategy>> = HashMap::new();
        launchers.insert(
            LaunchStrategyKind::InMemory,
            Arc::new(InMemoryLaunchStrategy::new().register("echo-plugin", router)),
        );

        let config = OrchestratorConfig {
            admit_deadline: StdDuration::from_secs(2),
            drain_grace: StdDuration::from_millis(10),
            runtime_token_ttl: Duration::seconds(3600),
            poll_interval: StdDuration::from_millis(10),
        };
        let orchestrator = PlatformOrchestrator::new(launchers, tokens, lifecycle.clone(), graph, registry, config);
        (orchestrator, lifecycle)
    }

    fn echo_spec() -> PluginSpec {
        PluginSpec {
            self_id: "echo-plugin".to_string(),
            strategy: LaunchStrategyKind::InMemory,
            command: None,
            args: vec![],
            endpoint_url: None,
        }
    }

    #[tokio::test]
    async fn add_plugin_admits_a_healthy_instance() {
        let (orchestrator, lifecycle) = build_orchestrator();
        let runtime_id = orchestrator.add_plugin(echo_spec()).await.unwrap();
        let record = lifecycle.get(&runtime_id).await.unwrap();
        assert!(record.is_routable());
    }

    #[tokio::test]
    async fn remove_plugin_is_idempotent() {
        let (orchestrator, lifecycle) = build_orchestrator();
        let runtime_id = orchestrator.add_plugin(echo_spec()).await.unwrap();
        orchestrator.remove_plugin(&runtime_id).await.unwrap();
        assert!(lifecycle.get(&runtime_id).await.is_none());
        orchestrator.remove_plugin(&runtime_id).await.unwrap();
    }

    #[tokio::test]
    async fn add_plugin_rejects_unknown_strategy() {
        let (orchestrator, _lifecycle) = build_orchestrator();
        let spec = PluginSpec {
            self_id: "ghost".to_string(),
            strategy: LaunchStrategyKind::Process,
            command: None,
            args: vec![],
            endpoint_url: None,
        };
        let err = orchestrator.add_plugin(spec).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }
}
