//! Service Registry (§4.6): `service_type → providers` and discovery.
//!
//! Selection strategy is split out into [`crate::selection`]; the live
//! health/base_url each candidate is judged against comes from
//! [`crate::lifecycle::LifecycleStore`] — the registry itself only ever
//! stores the structural fact "this runtime_id provides this service_type
//! at this path".
//!
//! This split keeps exactly one writer per map: the registry never reaches
//! into a plugin's health, and the lifecycle store never knows what services
//! anyone provides.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use platform_plugin_sdk::models::{WatchEventKind, WatchServiceEvent};

use crate::error::PlatformError;
use crate::lifecycle::LifecycleStore;
use crate::selection::{select_index, RoundRobinCursor, SelectionStrategy};
use crate::validator::{parse_semver_core, validate_endpoint_path, validate_service_type, validate_version};

const WATCH_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub runtime_id: String,
    pub version: String,
    pub endpoint_path: String,
}

struct Subscriber {
    sender: mpsc::Sender<WatchServiceEvent>,
}

pub struct ServiceRegistry {
    lifecycle: Arc<LifecycleStore>,
    providers: RwLock<HashMap<String, Vec<ProviderEntry>>>,
    cursors: RwLock<HashMap<String, RoundRobinCursor>>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    /// Resolved Open Question (§9): prefer HEALTHY providers, falling back to
    /// DEGRADED only when no HEALTHY candidate exists.
    prefer_healthy: bool,
    default_strategy: SelectionStrategy,
}

/// Outcome of a discovery, surfacing whether the result was a DEGRADED fallback.
pub struct SelectionOutcome {
    pub runtime_id: String,
    pub endpoint_url: String,
    pub selected_degraded: bool,
}

impl ServiceRegistry {
    pub fn new(lifecycle: Arc<LifecycleStore>, prefer_healthy: bool, default_strategy: SelectionStrategy) -> Arc<Self> {
        Arc::new(Self {
            lifecycle,
            providers: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            prefer_healthy,
            default_strategy,
        })
    }

    /// Register one `(service_type, version)` → `(runtime_id, endpoint_path)`
    /// mapping. Rejects with `Conflict` if `runtime_id` already registered this
    /// exact `(service_type, version)` pair; a different `version` from the
    /// same `runtime_id` is a distinct registration, not a conflict.
    pub async fn register(
        &self,
        runtime_id: &str,
        service_type: &str,
        version: &str,
        endpoint_path: &str,
    ) -> Result<(), PlatformError> {
        validate_service_type(service_type)?;
        validate_version(version)?;
        validate_endpoint_path(endpoint_path)?;

        let record = self.lifecycle.get(runtime_id).await.ok_or_else(|| PlatformError::NotFound {
            message: format!("unknown runtime_id '{runtime_id}'"),
        })?;
        if !record.may_register(service_type) {
            return Err(PlatformError::PermissionDenied {
                message: format!("'{}' is not allowed to provide '{service_type}'", record.self_id),
            });
        }

        let mut providers = self.providers.write().await;
        let entries = providers.entry(service_type.to_string()).or_default();
        let was_empty = entries.is_empty();
        if entries.iter().any(|e| e.runtime_id == runtime_id && e.version == version) {
            return Err(PlatformError::Conflict {
                message: format!(
                    "'{runtime_id}' already registered '{service_type}' version '{version}'"
                ),
            });
        }
        entries.push(ProviderEntry {
            runtime_id: runtime_id.to_string(),
            version: version.to_string(),
            endpoint_path: endpoint_path.to_string(),
        });
        drop(providers);

        if was_empty {
            self.publish(
                service_type,
                WatchServiceEvent {
                    service_type: service_type.to_string(),
                    kind: WatchEventKind::Available,
                },
            )
            .await;
        }
        Ok(())
    }

    /// Remove one provider's registration for a `(service_type, version)` pair.
    pub async fn unregister(&self, runtime_id: &str, service_type: &str, version: &str) {
        let became_empty = {
            let mut providers = self.providers.write().await;
            match providers.get_mut(service_type) {
                Some(entries) => {
                    entries.retain(|e| !(e.runtime_id == runtime_id && e.version == version));
                    entries.is_empty()
                }
                None => false,
            }
        };
        if became_empty {
            self.publish(
                service_type,
                WatchServiceEvent {
                    service_type: service_type.to_string(),
                    kind: WatchEventKind::Unavailable,
                },
            )
            .await;
        }
    }

    /// Remove every registration belonging to one plugin (used on `RemovePlugin`).
    pub async fn unregister_all_for_runtime(&self, runtime_id: &str) {
        let emptied: Vec<String> = {
            let mut providers = self.providers.write().await;
            let mut emptied = Vec::new();
            for (service_type, entries) in providers.iter_mut() {
                let before = entries.len();
                entries.retain(|e| e.runtime_id != runtime_id);
                if before > 0 && entries.is_empty() {
                    emptied.push(service_type.clone());
                }
            }
            emptied
        };
        for service_type in emptied {
            self.publish(
                &service_type,
                WatchServiceEvent {
                    service_type: service_type.clone(),
                    kind: WatchEventKind::Unavailable,
                },
            )
            .await;
        }
    }

    /// Resolve one live endpoint for `service_type` at `min_version` or better.
    ///
    /// Candidates are filtered by version floor, then partitioned into
    /// HEALTHY and DEGRADED tiers by asking the lifecycle store for each
    /// candidate's live state (never cached here). When `prefer_healthy` and
    /// a HEALTHY tier exists, selection runs over that tier only; otherwise
    /// it falls back to DEGRADED. An empty result after both tiers is a
    /// `failed_precondition`, never a silent pick of an UNHEALTHY instance.
    pub async fn discover(&self, service_type: &str, min_version: &str) -> Result<SelectionOutcome, PlatformError> {
        validate_service_type(service_type)?;
        validate_version(min_version)?;
        let floor = parse_semver_core(min_version);

        let candidates: Vec<ProviderEntry> = {
            let providers = self.providers.read().await;
            providers
                .get(service_type)
                .into_iter()
                .flatten()
                .filter(|e| parse_semver_core(&e.version) >= floor)
                .cloned()
                .collect()
        };
        if candidates.is_empty() {
            return Err(PlatformError::NotFound {
                message: format!("no provider registered for '{service_type}' >= {min_version}"),
            });
        }

        let mut healthy = Vec::new();
        let mut degraded = Vec::new();
        for candidate in candidates {
            match self.lifecycle.get(&candidate.runtime_id).await {
                Some(record) if record.is_routable() => {
                    if record.health.state == platform_plugin_sdk::models::HealthState::Healthy {
                        healthy.push(candidate);
                    } else {
                        degraded.push(candidate);
                    }
                }
                _ => {}
            }
        }

        let (tier, is_degraded) = if self.prefer_healthy && !healthy.is_empty() {
            (healthy, false)
        } else if !degraded.is_empty() {
            (degraded, true)
        } else if !healthy.is_empty() {
            (healthy, false)
        } else {
            return Err(PlatformError::FailedPrecondition {
                message: format!("no routable provider for '{service_type}' >= {min_version}"),
            });
        };

        let cursor_key = service_type.to_string();
        let index = {
            let cursors = self.cursors.read().await;
            if let Some(cursor) = cursors.get(&cursor_key) {
                select_index(self.default_strategy, tier.len(), cursor)
            } else {
                drop(cursors);
                let mut cursors = self.cursors.write().await;
                let cursor = cursors.entry(cursor_key).or_default();
                select_index(self.default_strategy, tier.len(), cursor)
            }
        };
        let chosen = &tier[index];
        let record = self.lifecycle.get(&chosen.runtime_id).await.ok_or_else(|| PlatformError::Unavailable {
            message: "selected provider was removed mid-selection".to_string(),
        })?;
        Ok(SelectionOutcome {
            runtime_id: chosen.runtime_id.clone(),
            endpoint_url: format!("{}{}", record.base_url, chosen.endpoint_path),
            selected_degraded: is_degraded,
        })
    }

    /// Subscribe to presence/absence transitions for `service_type`.
    pub async fn watch(&self, service_type: &str) -> mpsc::Receiver<WatchServiceEvent> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        self.subscribers
            .write()
            .await
            .entry(service_type.to_string())
            .or_default()
            .push(Subscriber { sender: tx });
        rx
    }

    async fn publish(&self, service_type: &str, event: WatchServiceEvent) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(subs) = subscribers.get_mut(service_type) {
            subs.retain(|sub| sub.sender.try_send(event.clone()).is_ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Health, PluginRecord};
    use chrono::Utc;
    use platform_plugin_sdk::models::HealthState;
    use std::collections::HashSet;

    async fn admit(lifecycle: &Arc<LifecycleStore>, runtime_id: &str, state: HealthState) {
        lifecycle
            .insert(PluginRecord {
                self_id: runtime_id.to_string(),
                runtime_id: runtime_id.to_string(),
                provides: vec![],
                requires: vec![],
                health: Health::default(),
                base_url: format!("http://127.0.0.1:9000/{runtime_id}"),
                transport: None,
                allowed_service_types: None::<HashSet<String>>,
                admitted_at: Utc::now(),
                quarantined: false,
            })
            .await;
        lifecycle.report_health(runtime_id, state, None, vec![]).await.unwrap();
    }

    #[tokio::test]
    async fn discover_prefers_healthy_over_degraded() {
        let lifecycle = LifecycleStore::new();
        admit(&lifecycle, "r1", HealthState::Degraded).await;
        admit(&lifecycle, "r2", HealthState::Healthy).await;
        let registry = ServiceRegistry::new(lifecycle, true, SelectionStrategy::First);
        registry.register("r1", "logger", "1.0.0", "/p").await.unwrap();
        registry.register("r2", "logger", "1.0.0", "/p").await.unwrap();

        let outcome = registry.discover("logger", "1.0.0").await.unwrap();
        assert_eq!(outcome.runtime_id, "r2");
        assert!(!outcome.selected_degraded);
    }

    #[tokio::test]
    async fn discover_falls_back_to_degraded_when_no_healthy() {
        let lifecycle = LifecycleStore::new();
        admit(&lifecycle, "r1", HealthState::Degraded).await;
        let registry = ServiceRegistry::new(lifecycle, true, SelectionStrategy::First);
        registry.register("r1", "logger", "1.0.0", "/p").await.unwrap();

        let outcome = registry.discover("logger", "1.0.0").await.unwrap();
        assert_eq!(outcome.runtime_id, "r1");
        assert!(outcome.selected_degraded);
    }

    #[tokio::test]
    async fn discover_rejects_when_nothing_routable() {
        let lifecycle = LifecycleStore::new();
        admit(&lifecycle, "r1", HealthState::Unhealthy).await;
        let registry = ServiceRegistry::new(lifecycle, true, SelectionStrategy::First);
        registry.register("r1", "logger", "1.0.0", "/p").await.unwrap();

        let err = registry.discover("logger", "1.0.0").await.unwrap_err();
        assert_eq!(err.kind(), "failed_precondition");
    }

    #[tokio::test]
    async fn discover_filters_by_min_version() {
        let lifecycle = LifecycleStore::new();
        admit(&lifecycle, "r1", HealthState::Healthy).await;
        let registry = ServiceRegistry::new(lifecycle, true, SelectionStrategy::First);
        registry.register("r1", "logger", "1.0.0", "/p").await.unwrap();

        let err = registry.discover("logger", "2.0.0").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn watch_receives_available_then_unavailable() {
        let lifecycle = LifecycleStore::new();
        admit(&lifecycle, "r1", HealthState::Healthy).await;
        let registry = ServiceRegistry::new(lifecycle, true, SelectionStrategy::First);

        let mut rx = registry.watch("logger").await;
        registry.register("r1", "logger", "1.0.0", "/p").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, WatchEventKind::Available);

        registry.unregister("r1", "logger", "1.0.0").await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, WatchEventKind::Unavailable);
    }

    #[tokio::test]
    async fn register_rejects_disallowed_service_type() {
        let lifecycle = LifecycleStore::new();
        let mut allowed = HashSet::new();
        allowed.insert("metrics".to_string());
        lifecycle
            .insert(PluginRecord {
                self_id: "r1".to_string(),
                runtime_id: "r1".to_string(),
                provides: vec![],
                requires: vec![],
                health: Health::default(),
                base_url: "http://127.0.0.1:9000".to_string(),
                transport: None,
                allowed_service_types: Some(allowed),
                admitted_at: Utc::now(),
                quarantined: false,
            })
            .await;
        let registry = ServiceRegistry::new(lifecycle, true, SelectionStrategy::First);
        let err = registry.register("r1", "logger", "1.0.0", "/p").await.unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
    }
}
