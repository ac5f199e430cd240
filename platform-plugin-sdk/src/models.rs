//! Wire types shared between a plugin (via [`crate::client::PluginClient`]) and the host.
//!
//! These mirror the JSON bodies the host's registry, lifecycle, and broker
//! endpoints accept and return. Keeping them in the SDK means a plugin and
//! the host never drift out of sync on field names.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One service a plugin offers, as declared at handshake time or registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDeclaration {
    #[serde(rename = "type")]
    pub service_type: String,
    pub version: String,
    pub endpoint_path: String,
}

/// One service a plugin depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDependency {
    #[serde(rename = "type")]
    pub service_type: String,
    pub min_version: String,
    #[serde(default)]
    pub required_for_startup: bool,
    #[serde(default)]
    pub watch_for_changes: bool,
}

/// Three-state health model a plugin self-reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    /// True iff a provider in this state should still receive routed traffic.
    pub fn is_routable(self) -> bool {
        matches!(self, HealthState::Healthy | HealthState::Degraded)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthState::Healthy => "HEALTHY",
            HealthState::Degraded => "DEGRADED",
            HealthState::Unhealthy => "UNHEALTHY",
        };
        write!(f, "{s}")
    }
}

/// Request body for `Handshake`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub self_id: String,
    pub self_version: String,
    #[serde(default)]
    pub provides: Vec<ServiceDeclaration>,
    #[serde(default)]
    pub requires: Vec<ServiceDependency>,
    pub core_protocol_version: String,
    pub magic_cookie: String,
    /// Base URL (scheme + host + port) the host should proxy to for any
    /// service this plugin `provides`. Required in self-register mode
    /// (`HOST_URL` present); platform-managed plugins instead learn their
    /// base URL was already fixed by the launch strategy, but still echo it
    /// here since the host has no other way to learn it from a raw HTTP call.
    pub endpoint_base_url: String,
}

/// Response body for `Handshake`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub runtime_id: String,
    pub runtime_token: String,
    #[serde(default)]
    pub available_capabilities: Vec<String>,
}

/// Response for `PluginIdentity.GetPluginInfo` (host → plugin, managed mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPluginInfoResponse {
    pub self_id: String,
    pub self_version: String,
    #[serde(default)]
    pub provides: Vec<ServiceDeclaration>,
    #[serde(default)]
    pub requires: Vec<ServiceDependency>,
}

/// Body for `PluginIdentity.SetRuntimeIdentity` (host → plugin, managed mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRuntimeIdentityRequest {
    pub runtime_id: String,
    pub runtime_token: String,
    #[serde(default)]
    pub available_capabilities: Vec<String>,
}

/// Body for `ReportHealth`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportHealthRequest {
    pub state: HealthState,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub unavailable_deps: Vec<String>,
}

/// Body for `RegisterService`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterServiceRequest {
    #[serde(rename = "type")]
    pub service_type: String,
    pub version: String,
    pub endpoint_path: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Body for `UnregisterService`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterServiceRequest {
    #[serde(rename = "type")]
    pub service_type: String,
    pub version: String,
}

/// Query for `DiscoverService`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverServiceQuery {
    #[serde(rename = "type")]
    pub service_type: String,
    pub min_version: String,
}

/// Response for `DiscoverService`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverServiceResponse {
    pub endpoint_url: String,
    pub provider_runtime_id: String,
    /// Whether the selected provider was DEGRADED (fell back because no HEALTHY
    /// candidate existed) — surfaced so callers and metrics can observe fallback.
    pub selected_degraded: bool,
}

/// One event delivered over `WatchService`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventKind {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchServiceEvent {
    #[serde(rename = "type")]
    pub service_type: String,
    pub kind: WatchEventKind,
}

/// One event delivered over a lifecycle subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub old: HealthState,
    pub new: HealthState,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Body for `RequestCapability`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCapabilityRequest {
    #[serde(rename = "type")]
    pub capability_type: String,
    #[serde(default)]
    pub min_version: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response for `RequestCapability`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityGrantResponse {
    pub grant_id: String,
    pub endpoint_url: String,
    pub bearer_token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Launch spec the orchestrator hands to a launch strategy implementation;
/// also used by the SDK's test harness to spawn a plugin in-process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    pub self_id: String,
    pub strategy: LaunchStrategyKind,
    /// Command to exec for the `Process` strategy; ignored otherwise.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Pre-configured endpoint for the `External` strategy; ignored otherwise.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchStrategyKind {
    Process,
    InMemory,
    External,
}
