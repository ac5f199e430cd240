//! Handshake Service (§4.4): the single entry point by which a plugin
//! process becomes an admitted, tokened instance of the host.
//!
//! Grounded on `auth.rs`'s `AuthService::validate_api_key` admission-check
//! shape (validate input, check a shared secret, mint a session), narrowed
//! from API-key validation to the magic-cookie wrong-service guard and
//! generalized from a session token to a runtime-bound one minted by
//! [`crate::token::TokenService`].

use chrono::{Duration, Utc};
use platform_plugin_sdk::models::{HandshakeRequest, HandshakeResponse, ServiceDependency};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dependency_graph::DependencyGraph;
use crate::error::PlatformError;
use crate::lifecycle::LifecycleStore;
use crate::plugin::{Health, PluginRecord};
use crate::token::{TokenScope, TokenService};
use crate::validator;

pub struct HandshakeConfig {
    pub core_protocol_version: String,
    pub magic_cookie: String,
    pub runtime_token_ttl: Duration,
    /// If `false` (the default posture), a new handshake under an already-live
    /// `self_id` quarantines the previous instance (§4.4 idempotency). If
    /// `true`, multiple concurrent instances of the same `self_id` coexist.
    pub allow_concurrent_instances: bool,
    /// `self_id → capability types this plugin may request`, surfaced back
    /// as `available_capabilities` so a plugin knows what it can ask the
    /// Capability Broker for without a failed round trip.
    pub capability_authorizations: HashMap<String, Vec<String>>,
}

pub struct HandshakeService {
    tokens: Arc<TokenService>,
    lifecycle: Arc<LifecycleStore>,
    graph: Arc<DependencyGraph>,
    config: HandshakeConfig,
    /// `self_id → live runtime_ids`, used to apply the quarantine-on-rehandshake rule.
    instances: RwLock<HashMap<String, Vec<String>>>,
}

impl HandshakeService {
    pub fn new(
        tokens: Arc<TokenService>,
        lifecycle: Arc<LifecycleStore>,
        graph: Arc<DependencyGraph>,
        config: HandshakeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            tokens,
            lifecycle,
            graph,
            config,
            instances: RwLock::new(HashMap::new()),
        })
    }

    pub async fn handshake(&self, request: HandshakeRequest) -> Result<HandshakeResponse, PlatformError> {
        validator::validate_self_id(&request.self_id)?;
        validator::validate_version(&request.self_version)?;
        for service in &request.provides {
            validator::validate_service_type(&service.service_type)?;
            validator::validate_version(&service.version)?;
            validator::validate_endpoint_path(&service.endpoint_path)?;
        }
        for dependency in &request.requires {
            validator::validate_service_type(&dependency.service_type)?;
            validator::validate_version(&dependency.min_version)?;
        }

        if request.core_protocol_version != self.config.core_protocol_version {
            return Err(PlatformError::FailedPrecondition {
                message: format!(
                    "core_protocol_version mismatch: host is '{}', plugin sent '{}'",
                    self.config.core_protocol_version, request.core_protocol_version
                ),
            });
        }
        if request.magic_cookie != self.config.magic_cookie {
            return Err(PlatformError::InvalidArgument {
                message: "magic_cookie does not match this host".to_string(),
            });
        }

        if !self.config.allow_concurrent_instances {
            let previous = {
                let mut instances = self.instances.write().await;
                instances.insert(request.self_id.clone(), vec![])
            };
            if let Some(previous_ids) = previous {
                for runtime_id in previous_ids {
                    self.lifecycle.mark_quarantined(&runtime_id).await;
                }
            }
        }

        let runtime_id = Uuid::new_v4().to_string();
        let (runtime_token, _expires_at) = self.tokens.mint(runtime_id.clone(), TokenScope::Runtime, self.config.runtime_token_ttl)?;

        let record = PluginRecord {
            self_id: request.self_id.clone(),
            runtime_id: runtime_id.clone(),
            provides: request.provides.clone(),
            requires: request.requires.clone(),
            health: Health::default(),
            base_url: request.endpoint_base_url.clone(),
            transport: None,
            allowed_service_types: None::<HashSet<String>>,
            admitted_at: Utc::now(),
            quarantined: false,
        };
        self.lifecycle.insert(record).await;

        self.graph
            .add(
                &runtime_id,
                request.provides.iter().map(|s| s.service_type.clone()),
                request
                    .requires
                    .iter()
                    .filter(|d: &&ServiceDependency| d.required_for_startup)
                    .map(|d| d.service_type.clone()),
            )
            .await;

        self.instances
            .write()
            .await
            .entry(request.self_id.clone())
            .or_default()
            .push(runtime_id.clone());

        let available_capabilities = self
            .config
            .capability_authorizations
            .get(&request.self_id)
            .cloned()
            .unwrap_or_default();

        Ok(HandshakeResponse {
            runtime_id,
            runtime_token,
            available_capabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(allow_concurrent: bool) -> Arc<HandshakeService> {
        HandshakeService::new(
            TokenService::new(),
            LifecycleStore::new(),
            DependencyGraph::new(),
            HandshakeConfig {
                core_protocol_version: "1.0".to_string(),
                magic_cookie: "host-cookie".to_string(),
                runtime_token_ttl: Duration::seconds(3600),
                allow_concurrent_instances: allow_concurrent,
                capability_authorizations: HashMap::new(),
            },
        )
    }

    fn request() -> HandshakeRequest {
        HandshakeRequest {
            self_id: "logger".to_string(),
            self_version: "1.0.0".to_string(),
            provides: vec![],
            requires: vec![],
            core_protocol_version: "1.0".to_string(),
            magic_cookie: "host-cookie".to_string(),
            endpoint_base_url: "http://127.0.0.1:9001".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_handshake_mints_runtime_identity() {
        let svc = service(true);
        let response = svc.handshake(request()).await.unwrap();
        assert!(!response.runtime_id.is_empty());
        assert!(!response.runtime_token.is_empty());
    }

    #[tokio::test]
    async fn protocol_version_mismatch_is_rejected() {
        let svc = service(true);
        let mut bad = request();
        bad.core_protocol_version = "2.0".to_string();
        let err = svc.handshake(bad).await.unwrap_err();
        assert_eq!(err.kind(), "failed_precondition");
    }

    #[tokio::test]
    async fn wrong_magic_cookie_is_rejected() {
        let svc = service(true);
        let mut bad = request();
        bad.magic_cookie = "wrong".to_string();
        let err = svc.handshake(bad).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn rehandshake_issues_new_runtime_id_and_quarantines_previous() {
        let svc = service(false);
        let mut second_request = request();
        second_request.endpoint_base_url = "http://127.0.0.1:9002".to_string();
        let first = svc.handshake(request()).await.unwrap();
        let second = svc.handshake(second_request).await.unwrap();
        assert_ne!(first.runtime_id, second.runtime_id);

        let old_record = svc.lifecycle.get(&first.runtime_id).await.unwrap();
        assert!(old_record.quarantined);
        let new_record = svc.lifecycle.get(&second.runtime_id).await.unwrap();
        assert!(!new_record.quarantined);
    }

    #[tokio::test]
    async fn concurrent_instances_allowed_when_configured() {
        let svc = service(true);
        let mut second_request = request();
        second_request.endpoint_base_url = "http://127.0.0.1:9002".to_string();
        let first = svc.handshake(request()).await.unwrap();
        let second = svc.handshake(second_request).await.unwrap();

        let old_record = svc.lifecycle.get(&first.runtime_id).await.unwrap();
        assert!(!old_record.quarantined);
        let new_record = svc.lifecycle.get(&second.runtime_id).await.unwrap();
        assert!(!new_record.quarantined);
    }
}
