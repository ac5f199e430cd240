//! Lifecycle State Store (§4.5): the canonical plugin map, per-plugin health,
//! and watcher notification.
//!
//! Grounded on `other_examples/…health_monitor.rs`'s `HealthMonitor` trait
//! and its `publish_event`-to-subscriber-channels pattern, generalized from
//! that file's richer `HealthCheckResult`/`HealthMetrics` model down to the
//! spec's plain `{old, new, at}` transition event and explicit
//! `ReportHealth`-only promotion rule (the host never infers state).

use chrono::Utc;
use platform_plugin_sdk::models::{HealthState, LifecycleEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::error::PlatformError;
use crate::plugin::{Health, PluginRecord};

/// Bound on the per-subscriber outbound channel. A subscriber that falls this
/// far behind is closed rather than allowed to grow the host's memory
/// unboundedly (§9 "close on slow consumer").
const WATCH_CHANNEL_CAPACITY: usize = 64;

struct Subscriber {
    sender: mpsc::Sender<LifecycleEvent>,
}

pub struct LifecycleStore {
    plugins: RwLock<HashMap<String, PluginRecord>>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl LifecycleStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            plugins: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
        })
    }

    pub async fn insert(&self, record: PluginRecord) {
        self.plugins.write().await.insert(record.runtime_id.clone(), record);
    }

    pub async fn get(&self, runtime_id: &str) -> Option<PluginRecord> {
        self.plugins.read().await.get(runtime_id).cloned()
    }

    pub async fn remove(&self, runtime_id: &str) -> Option<PluginRecord> {
        let removed = self.plugins.write().await.remove(runtime_id);
        self.subscribers.write().await.remove(runtime_id);
        removed
    }

    /// `true` iff state ∈ {HEALTHY, DEGRADED} and the record isn't quarantined.
    pub async fn should_route_traffic(&self, runtime_id: &str) -> bool {
        self.plugins
            .read()
            .await
            .get(runtime_id)
            .is_some_and(PluginRecord::is_routable)
    }

    pub async fn mark_quarantined(&self, runtime_id: &str) {
        if let Some(record) = self.plugins.write().await.get_mut(runtime_id) {
            record.quarantined = true;
        }
    }

    /// Plugin-initiated state transition. Promotion DEGRADED → HEALTHY only
    /// ever happens here, on an explicit call — the host never infers it.
    pub async fn report_health(
        &self,
        runtime_id: &str,
        new_state: HealthState,
        reason: Option<String>,
        unavailable_deps: Vec<String>,
    ) -> Result<(), PlatformError> {
        let old_state = {
            let mut plugins = self.plugins.write().await;
            let record = plugins
                .get_mut(runtime_id)
                .ok_or_else(|| PlatformError::NotFound {
                    message: format!("unknown runtime_id '{runtime_id}'"),
                })?;
            let old = record.health.state;
            record.health = Health {
                state: new_state,
                reason,
                unavailable_deps,
            };
            old
        };
        if old_state != new_state {
            self.publish(
                runtime_id,
                LifecycleEvent {
                    old: old_state,
                    new: new_state,
                    at: Utc::now(),
                },
            )
            .await;
        }
        Ok(())
    }

    /// Subscribe to transitions for one plugin. Returns a bounded receiver;
    /// the sender side is dropped (closing the stream) if the plugin is
    /// removed or the subscriber falls behind.
    pub async fn subscribe(&self, runtime_id: &str) -> mpsc::Receiver<LifecycleEvent> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        self.subscribers
            .write()
            .await
            .entry(runtime_id.to_string())
            .or_default()
            .push(Subscriber { sender: tx });
        rx
    }

    async fn publish(&self, runtime_id: &str, event: LifecycleEvent) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(subs) = subscribers.get_mut(runtime_id) {
            // try_send: a full channel means a slow consumer; drop that
            // subscriber rather than block the publisher or buffer unboundedly.
            subs.retain(|sub| sub.sender.try_send(event.clone()).is_ok());
        }
    }

    pub async fn count(&self) -> usize {
        self.plugins.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn record(runtime_id: &str) -> PluginRecord {
        PluginRecord {
            self_id: runtime_id.to_string(),
            runtime_id: runtime_id.to_string(),
            provides: vec![],
            requires: vec![],
            health: Health::default(),
            base_url: "http://127.0.0.1:0".to_string(),
            transport: None,
            allowed_service_types: None::<HashSet<String>>,
            admitted_at: Utc::now(),
            quarantined: false,
        }
    }

    #[tokio::test]
    async fn degraded_is_routable_healthy_is_not_default() {
        let store = LifecycleStore::new();
        store.insert(record("r1")).await;
        assert!(store.should_route_traffic("r1").await);
    }

    #[tokio::test]
    async fn unhealthy_is_not_routable() {
        let store = LifecycleStore::new();
        store.insert(record("r1")).await;
        store
            .report_health("r1", HealthState::Unhealthy, None, vec![])
            .await
            .unwrap();
        assert!(!store.should_route_traffic("r1").await);
    }

    #[tokio::test]
    async fn promotion_requires_explicit_report() {
        let store = LifecycleStore::new();
        store.insert(record("r1")).await;
        store
            .report_health("r1", HealthState::Degraded, Some("logger unavailable".into()), vec!["logger".into()])
            .await
            .unwrap();
        assert!(store.should_route_traffic("r1").await);
        let current = store.get("r1").await.unwrap();
        assert_eq!(current.health.state, HealthState::Degraded);
        store.report_health("r1", HealthState::Healthy, None, vec![]).await.unwrap();
        let current = store.get("r1").await.unwrap();
        assert_eq!(current.health.state, HealthState::Healthy);
    }

    #[tokio::test]
    async fn subscriber_receives_transition_event() {
        let store = LifecycleStore::new();
        store.insert(record("r1")).await;
        let mut rx = store.subscribe("r1").await;
        store.report_health("r1", HealthState::Unhealthy, None, vec![]).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.old, HealthState::Degraded);
        assert_eq!(event.new, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_drops_subscribers() {
        let store = LifecycleStore::new();
        store.insert(record("r1")).await;
        let mut rx = store.subscribe("r1").await;
        assert!(store.remove("r1").await.is_some());
        assert!(store.remove("r1").await.is_none());
        assert!(rx.recv().await.is_none());
    }
}
