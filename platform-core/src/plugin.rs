//! The Plugin record (§3) shared by every component that needs to look one up.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use platform_plugin_sdk::models::{HealthState, ServiceDeclaration, ServiceDependency};
use std::collections::HashSet;

use crate::launch::DuplexTransport;

#[derive(Debug, Clone)]
pub struct Health {
    pub state: HealthState,
    pub reason: Option<String>,
    pub unavailable_deps: Vec<String>,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            state: HealthState::Degraded,
            reason: Some("newly admitted, awaiting first health report".to_string()),
            unavailable_deps: Vec::new(),
        }
    }
}

/// One admitted plugin instance.
#[derive(Debug, Clone)]
pub struct PluginRecord {
    pub self_id: String,
    pub runtime_id: String,
    pub provides: Vec<ServiceDeclaration>,
    pub requires: Vec<ServiceDependency>,
    pub health: Health,
    pub base_url: String,
    /// Set only for plugins launched via the `InMemory` strategy; routing
    /// and the shutdown RPC go through this instead of `base_url` when present.
    pub transport: Option<Arc<DuplexTransport>>,
    /// `None` ⇒ allow-all; `Some(set)` ⇒ whitelist (empty set ⇒ deny-all).
    pub allowed_service_types: Option<HashSet<String>>,
    pub admitted_at: DateTime<Utc>,
    /// Set once `RemovePlugin` begins; the record is kept (for in-flight
    /// drain) but never again returned by discovery or admitted for auth.
    pub quarantined: bool,
}

impl PluginRecord {
    pub fn may_register(&self, service_type: &str) -> bool {
        match &self.allowed_service_types {
            None => true,
            Some(set) => set.contains(service_type),
        }
    }

    pub fn is_routable(&self) -> bool {
        !self.quarantined && self.health.state.is_routable()
    }
}
