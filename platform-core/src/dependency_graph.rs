//! Dependency Graph (§4.7): required-edge topology over admitted plugins,
//! startup ordering, and removal-impact queries.
//!
//! Kahn's algorithm is the standard approach for this and has no single
//! ready-made source in the pack; the cycle-error semantics (name the
//! members, leave nothing partially initialized) are grounded on
//! `other_examples/…kunihir0-gini…dependency.rs`'s
//! `test_plugin_shutdown_cycle`, which asserts the failure names a plugin in
//! the cycle and that no member is left initialized.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::PlatformError;

#[derive(Debug, Clone, Default)]
struct Node {
    /// service_types this runtime_id provides.
    provides: BTreeSet<String>,
    /// service_types this runtime_id requires (required_for_startup only).
    requires: BTreeSet<String>,
}

pub struct ImpactReport {
    pub affected_plugins: Vec<String>,
    pub affected_services: Vec<String>,
    pub optional_impact: Vec<String>,
}

struct Graph {
    nodes: HashMap<String, Node>,
    /// service_type → providers of it, used to resolve requires-edges to runtime_ids.
    providers_of: HashMap<String, BTreeSet<String>>,
}

/// Tracks plugin nodes and the required-edge topology derived from their
/// declared `provides`/`requires`. Mutated under a single writer lock; reads
/// (`StartupOrder`, `GetImpact`) take a read lock and never cross a network
/// call while holding it.
pub struct DependencyGraph {
    inner: RwLock<Graph>,
}

impl DependencyGraph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Graph {
                nodes: HashMap::new(),
                providers_of: HashMap::new(),
            }),
        })
    }

    /// Add or replace a node. Missing required providers at `Add` time are
    /// not rejected here — the plugin simply starts DEGRADED and the graph
    /// records the edge once a provider later registers.
    pub async fn add(
        &self,
        runtime_id: &str,
        provides: impl IntoIterator<Item = String>,
        requires: impl IntoIterator<Item = String>,
    ) {
        let mut graph = self.inner.write().await;
        let provides: BTreeSet<String> = provides.into_iter().collect();
        for service_type in &provides {
            graph
                .providers_of
                .entry(service_type.clone())
                .or_default()
                .insert(runtime_id.to_string());
        }
        graph.nodes.insert(
            runtime_id.to_string(),
            Node {
                provides,
                requires: requires.into_iter().collect(),
            },
        );
    }

    pub async fn remove(&self, runtime_id: &str) {
        let mut graph = self.inner.write().await;
        if let Some(node) = graph.nodes.remove(runtime_id) {
            for service_type in &node.provides {
                if let Some(set) = graph.providers_of.get_mut(service_type) {
                    set.remove(runtime_id);
                    if set.is_empty() {
                        graph.providers_of.remove(service_type);
                    }
                }
            }
        }
    }

    /// Build the required-edge adjacency (`dependency_runtime_id → Vec<dependent_runtime_id>`)
    /// plus in-degree counts, resolving each `requires` service_type to its
    /// current provider set. A required service_type with no registered
    /// provider contributes no edge — that plugin simply has no in-edge from
    /// it and starts DEGRADED, per §4.7.
    fn build_adjacency(graph: &Graph) -> (BTreeMap<String, BTreeSet<String>>, BTreeMap<String, usize>) {
        let mut adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut in_degree: BTreeMap<String, usize> = graph.nodes.keys().map(|id| (id.clone(), 0)).collect();

        for (dependent, node) in &graph.nodes {
            for required_type in &node.requires {
                let Some(providers) = graph.providers_of.get(required_type) else {
                    continue;
                };
                for provider in providers {
                    if provider == dependent {
                        continue;
                    }
                    let added = adjacency.entry(provider.clone()).or_default().insert(dependent.clone());
                    if added {
                        *in_degree.entry(dependent.clone()).or_insert(0) += 1;
                    }
                }
            }
        }
        (adjacency, in_degree)
    }

    /// Kahn's topological sort restricted to required edges. Ties (nodes
    /// simultaneously ready) are broken by `runtime_id` lexicographic order
    /// for determinism (I4, P5).
    pub async fn startup_order(&self) -> Result<Vec<String>, PlatformError> {
        let graph = self.inner.read().await;
        let (adjacency, mut in_degree) = Self::build_adjacency(&graph);

        let mut ready: BTreeSet<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| id.clone())
            .collect();

        let mut order = Vec::with_capacity(graph.nodes.len());
        while let Some(next) = ready.iter().next().cloned() {
            ready.remove(&next);
            order.push(next.clone());
            if let Some(dependents) = adjacency.get(&next) {
                for dependent in dependents {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.insert(dependent.clone());
                        }
                    }
                }
            }
        }

        if order.len() != graph.nodes.len() {
            let unresolved: Vec<&str> = graph
                .nodes
                .keys()
                .filter(|id| !order.contains(id))
                .map(String::as_str)
                .collect();
            return Err(PlatformError::FailedPrecondition {
                message: format!(
                    "cycle detected in required dependencies, involving: {}",
                    unresolved.join(", ")
                ),
            });
        }
        Ok(order)
    }

    /// Transitive closure of dependents over required edges (nodes that
    /// `require` `runtime_id`, directly or transitively) plus the services
    /// `runtime_id` itself provided, for an impending `RemovePlugin`.
    pub async fn get_impact(&self, runtime_id: &str) -> ImpactReport {
        let graph = self.inner.read().await;
        let (adjacency, _) = Self::build_adjacency(&graph);

        let mut affected_plugins = BTreeSet::new();
        let mut queue = VecDeque::new();
        if let Some(direct) = adjacency.get(runtime_id) {
            queue.extend(direct.iter().cloned());
        }
        while let Some(id) = queue.pop_front() {
            if affected_plugins.insert(id.clone()) {
                if let Some(next) = adjacency.get(&id) {
                    queue.extend(next.iter().cloned());
                }
            }
        }

        let affected_services = graph
            .nodes
            .get(runtime_id)
            .map(|node| node.provides.iter().cloned().collect())
            .unwrap_or_default();

        // Optional impact: plugins that merely *watch* (not require) a service
        // this node provides isn't modeled in the graph itself (watches live
        // in the Registry); report the service types as the optional surface.
        let optional_impact = graph
            .nodes
            .get(runtime_id)
            .map(|node| node.provides.iter().cloned().collect())
            .unwrap_or_default();

        ImpactReport {
            affected_plugins: affected_plugins.into_iter().collect(),
            affected_services,
            optional_impact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn startup_order_respects_required_edges() {
        let graph = DependencyGraph::new();
        graph.add("logger", vec!["logger".to_string()], vec![]).await;
        graph.add("storage", vec!["storage".to_string()], vec!["logger".to_string()]).await;
        graph.add("api", vec!["api".to_string()], vec!["storage".to_string()]).await;

        let order = graph.startup_order().await.unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("logger") < pos("storage"));
        assert!(pos("storage") < pos("api"));
    }

    #[tokio::test]
    async fn cycle_is_rejected_naming_a_member() {
        let graph = DependencyGraph::new();
        graph.add("a", vec!["a".to_string()], vec!["c".to_string()]).await;
        graph.add("b", vec!["b".to_string()], vec!["a".to_string()]).await;
        graph.add("c", vec!["c".to_string()], vec!["b".to_string()]).await;

        let err = graph.startup_order().await.unwrap_err();
        assert_eq!(err.kind(), "failed_precondition");
        let message = err.to_string();
        assert!(message.contains('a') || message.contains('b') || message.contains('c'));
    }

    #[tokio::test]
    async fn missing_provider_does_not_fail_startup_order() {
        let graph = DependencyGraph::new();
        graph.add("storage", vec!["storage".to_string()], vec!["logger".to_string()]).await;
        let order = graph.startup_order().await.unwrap();
        assert_eq!(order, vec!["storage".to_string()]);
    }

    #[tokio::test]
    async fn get_impact_returns_transitive_dependents() {
        let graph = DependencyGraph::new();
        graph.add("logger", vec!["logger".to_string()], vec![]).await;
        graph.add("storage", vec!["storage".to_string()], vec!["logger".to_string()]).await;
        graph.add("api", vec!["api".to_string()], vec!["storage".to_string()]).await;

        let impact = graph.get_impact("logger").await;
        assert_eq!(impact.affected_services, vec!["logger".to_string()]);
        assert!(impact.affected_plugins.contains(&"storage".to_string()));
        assert!(impact.affected_plugins.contains(&"api".to_string()));
    }

    #[tokio::test]
    async fn remove_drops_node_and_edges() {
        let graph = DependencyGraph::new();
        graph.add("logger", vec!["logger".to_string()], vec![]).await;
        graph.add("storage", vec!["storage".to_string()], vec!["logger".to_string()]).await;
        graph.remove("logger").await;
        let order = graph.startup_order().await.unwrap();
        assert_eq!(order, vec!["storage".to_string()]);
    }
}
