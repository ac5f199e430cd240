//! Capability Broker (§4.8): grants plugins time-limited permission to call
//! a host-provided service without authenticating to each one separately.
//!
//! Grant minting reuses the Token Service's `TokenScope::CapabilityGrant`
//! (§4.1) rather than a parallel token store; the broker only adds the
//! authorization check and the `grant_id → token` index needed for the
//! optional `Revoke` operation. Grounded on `auth.rs`'s session-TTL pattern,
//! narrowed from JWT sessions to opaque grant tokens.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::PlatformError;
use crate::token::{TokenRecord, TokenScope, TokenService};

pub struct BrokerConfig {
    pub default_ttl: Duration,
    /// `capability_type → runtime_ids allowed to request it`. A type absent
    /// from this map has no authorized requesters (deny-by-default).
    pub authorizations: HashMap<String, HashSet<String>>,
    /// `capability_type → host-local endpoint path` the grant is good for.
    pub endpoints: HashMap<String, String>,
}

pub struct GrantIssued {
    pub grant_id: String,
    pub endpoint_url: String,
    pub bearer_token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct CapabilityBroker {
    tokens: Arc<TokenService>,
    config: BrokerConfig,
    host_base_url: String,
    /// `grant_id → bearer token`, so `Revoke(grant_id)` can find the token to
    /// kill without exposing the token itself as the revocation handle.
    grants: DashMap<String, String>,
}

impl CapabilityBroker {
    pub fn new(tokens: Arc<TokenService>, config: BrokerConfig, host_base_url: String) -> Arc<Self> {
        Arc::new(Self {
            tokens,
            config,
            host_base_url,
            grants: DashMap::new(),
        })
    }

    /// `RequestCapability(type, min_version, reason)`. `min_version` and
    /// `reason` are accepted for audit/future capability-versioning but do
    /// not affect authorization today — every capability type currently
    /// exposes exactly one version.
    pub fn request_capability(
        &self,
        grantee_runtime_id: &str,
        capability_type: &str,
        _min_version: Option<&str>,
        _reason: Option<&str>,
    ) -> Result<GrantIssued, PlatformError> {
        let authorized = self
            .config
            .authorizations
            .get(capability_type)
            .is_some_and(|allowed| allowed.contains(grantee_runtime_id));
        if !authorized {
            return Err(PlatformError::PermissionDenied {
                message: format!("'{grantee_runtime_id}' is not authorized for capability '{capability_type}'"),
            });
        }
        let endpoint_path = self.config.endpoints.get(capability_type).ok_or_else(|| PlatformError::NotFound {
            message: format!("no capability handler registered for '{capability_type}'"),
        })?;

        let (token, expires_at) = self.tokens.mint(
            grantee_runtime_id,
            TokenScope::CapabilityGrant {
                capability_type: capability_type.to_string(),
            },
            self.config.default_ttl,
        )?;
        let grant_id = Uuid::new_v4().to_string();
        self.grants.insert(grant_id.clone(), token.clone());

        Ok(GrantIssued {
            grant_id,
            endpoint_url: format!("{}{}", self.host_base_url, endpoint_path),
            bearer_token: token,
            expires_at,
        })
    }

    /// Validates a presented grant token is both valid and scoped to
    /// `capability_type`, for the broker's HTTP prefix (§4.8 invariant).
    pub fn validate_grant(&self, presented: &str, capability_type: &str) -> Result<TokenRecord, PlatformError> {
        let record = self.tokens.validate(presented)?;
        match &record.scope {
            TokenScope::CapabilityGrant { capability_type: granted } if granted == capability_type => Ok(record),
            _ => Err(PlatformError::Unauthenticated {
                message: "grant is not scoped to this capability".to_string(),
            }),
        }
    }

    /// Optional administrative revocation (§4.8); never the primary security
    /// bound — TTL is. Idempotent on an unknown `grant_id`.
    pub fn revoke(&self, grant_id: &str) {
        if let Some((_, token)) = self.grants.remove(grant_id) {
            self.tokens.revoke(&token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> Arc<CapabilityBroker> {
        let mut authorizations = HashMap::new();
        authorizations.insert("logger".to_string(), HashSet::from(["storage".to_string()]));
        let mut endpoints = HashMap::new();
        endpoints.insert("logger".to_string(), "/capabilities/logger".to_string());
        CapabilityBroker::new(
            TokenService::new(),
            BrokerConfig {
                default_ttl: Duration::seconds(300),
                authorizations,
                endpoints,
            },
            "http://127.0.0.1:8080".to_string(),
        )
    }

    #[test]
    fn authorized_grantee_receives_grant() {
        let broker = broker();
        let grant = broker.request_capability("storage", "logger", None, None).unwrap();
        assert_eq!(grant.endpoint_url, "http://127.0.0.1:8080/capabilities/logger");
        assert!(broker.validate_grant(&grant.bearer_token, "logger").is_ok());
    }

    #[test]
    fn unauthorized_grantee_is_denied() {
        let broker = broker();
        let err = broker.request_capability("api", "logger", None, None).unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
    }

    #[test]
    fn grant_is_not_valid_for_a_different_capability() {
        let broker = broker();
        let grant = broker.request_capability("storage", "logger", None, None).unwrap();
        let err = broker.validate_grant(&grant.bearer_token, "secrets").unwrap_err();
        assert_eq!(err.kind(), "unauthenticated");
    }

    #[test]
    fn revoke_invalidates_the_grant() {
        let broker = broker();
        let grant = broker.request_capability("storage", "logger", None, None).unwrap();
        broker.revoke(&grant.grant_id);
        assert!(broker.validate_grant(&grant.bearer_token, "logger").is_err());
        // Idempotent
        broker.revoke(&grant.grant_id);
    }
}
