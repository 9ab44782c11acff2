//! Dependency ledger

use crate::validate::require_service;
use atlas_core::{DependencyEdge, EdgeSpec, Error, Result, Topology};
use atlas_state::ServiceRegistry;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Directed edges between registered services.
///
/// Edges are validated against the registry only when created. Deleting a
/// service leaves its edges in place; they are filtered out of topology
/// snapshots while either endpoint is missing.
#[derive(Debug, Clone)]
pub struct DependencyLedger {
    registry: ServiceRegistry,
    edges: Arc<RwLock<BTreeMap<u64, DependencyEdge>>>,
    next_id: Arc<AtomicU64>,
}

impl DependencyLedger {
    /// Create an empty ledger over `registry`
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry,
            edges: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Record `source → target`.
    ///
    /// Fails with `InvalidEdge` if either endpoint is unknown or the ordered
    /// pair already has an edge.
    pub fn add_edge(&self, spec: EdgeSpec) -> Result<DependencyEdge> {
        require_service(&self.registry, &spec.source_service_id, "source", Error::InvalidEdge)?;
        require_service(&self.registry, &spec.target_service_id, "target", Error::InvalidEdge)?;

        let mut edges = self.edges.write();
        let duplicate = edges.values().any(|e| {
            e.source_service_id == spec.source_service_id
                && e.target_service_id == spec.target_service_id
        });
        if duplicate {
            return Err(Error::InvalidEdge(format!(
                "dependency {} -> {} already exists",
                spec.source_service_id, spec.target_service_id
            )));
        }

        let edge = DependencyEdge {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            source_service_id: spec.source_service_id,
            target_service_id: spec.target_service_id,
            description: spec.description,
            created_at: Utc::now(),
        };
        edges.insert(edge.id, edge.clone());

        info!(
            edge_id = edge.id,
            source = %edge.source_service_id,
            target = %edge.target_service_id,
            "Dependency added"
        );
        Ok(edge)
    }

    /// Remove an edge by id
    pub fn remove_edge(&self, id: u64) -> Result<DependencyEdge> {
        let removed = self
            .edges
            .write()
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("dependency {id}")))?;
        info!(edge_id = id, "Dependency removed");
        Ok(removed)
    }

    /// Look up one edge
    pub fn get_edge(&self, id: u64) -> Option<DependencyEdge> {
        self.edges.read().get(&id).cloned()
    }

    /// All edges, newest first
    pub fn list_edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self.edges.read().values().cloned().collect();
        edges.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        edges
    }

    /// Edges where `id` is the caller
    pub fn dependencies_of(&self, id: &str) -> Vec<DependencyEdge> {
        self.filter(|e| e.source_service_id == id)
    }

    /// Edges where `id` is the callee
    pub fn dependents_of(&self, id: &str) -> Vec<DependencyEdge> {
        self.filter(|e| e.target_service_id == id)
    }

    fn filter<F>(&self, predicate: F) -> Vec<DependencyEdge>
    where
        F: Fn(&DependencyEdge) -> bool,
    {
        self.edges
            .read()
            .values()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    /// Snapshot of all services plus the edges whose endpoints both exist
    pub fn list_topology(&self) -> Topology {
        let services = self.registry.list();
        let known: HashSet<&str> = services.iter().map(|s| s.id.as_str()).collect();
        let edges = self
            .edges
            .read()
            .values()
            .filter(|e| {
                known.contains(e.source_service_id.as_str())
                    && known.contains(e.target_service_id.as_str())
            })
            .cloned()
            .collect();
        Topology { services, edges }
    }

    /// All edges in id order, for persistence
    pub fn snapshot(&self) -> Vec<DependencyEdge> {
        self.edges.read().values().cloned().collect()
    }

    /// Replace the content with restored edges
    pub fn restore(&self, restored: Vec<DependencyEdge>) {
        let mut edges = self.edges.write();
        edges.clear();
        let mut max_id = 0;
        for edge in restored {
            max_id = max_id.max(edge.id);
            edges.insert(edge.id, edge);
        }
        self.next_id.store(max_id + 1, Ordering::SeqCst);
        debug!(count = edges.len(), "Restored dependency edges");
    }

    /// Number of edges, dangling ones included
    pub fn len(&self) -> usize {
        self.edges.read().len()
    }

    /// Whether the ledger is empty
    pub fn is_empty(&self) -> bool {
        self.edges.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::ServiceDescriptor;

    fn ledger() -> DependencyLedger {
        let registry = ServiceRegistry::new();
        for id in ["web", "api", "db"] {
            registry.upsert(id, ServiceDescriptor::new(id, "127.0.0.1", 8000), Utc::now());
        }
        DependencyLedger::new(registry)
    }

    fn spec(source: &str, target: &str) -> EdgeSpec {
        EdgeSpec {
            source_service_id: source.to_string(),
            target_service_id: target.to_string(),
            description: None,
        }
    }

    #[test]
    fn test_add_edge() {
        let ledger = ledger();
        let edge = ledger.add_edge(spec("web", "api")).unwrap();
        assert_eq!(edge.id, 1);
        assert_eq!(ledger.get_edge(1).unwrap(), edge);
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let ledger = ledger();
        ledger.add_edge(spec("web", "api")).unwrap();
        let err = ledger.add_edge(spec("web", "api")).unwrap_err();
        assert!(matches!(err, Error::InvalidEdge(_)));

        // the reverse direction is a different edge
        assert!(ledger.add_edge(spec("api", "web")).is_ok());
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let ledger = ledger();
        assert!(matches!(
            ledger.add_edge(spec("web", "ghost")).unwrap_err(),
            Error::InvalidEdge(_)
        ));
        assert!(matches!(
            ledger.add_edge(spec("ghost", "web")).unwrap_err(),
            Error::InvalidEdge(_)
        ));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_remove_edge() {
        let ledger = ledger();
        let edge = ledger.add_edge(spec("web", "api")).unwrap();
        assert!(ledger.remove_edge(edge.id).is_ok());
        assert!(matches!(
            ledger.remove_edge(edge.id).unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_topology_filters_dangling_edges() {
        let ledger = ledger();
        ledger.add_edge(spec("web", "api")).unwrap();
        ledger.add_edge(spec("api", "db")).unwrap();

        ledger.registry.remove("db");
        let topology = ledger.list_topology();
        assert_eq!(topology.services.len(), 2);
        assert_eq!(topology.edges.len(), 1);
        assert_eq!(topology.edges[0].target_service_id, "api");

        // dangling edges are kept, only hidden
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_directional_queries() {
        let ledger = ledger();
        ledger.add_edge(spec("web", "api")).unwrap();
        ledger.add_edge(spec("api", "db")).unwrap();

        let deps = ledger.dependencies_of("api");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].target_service_id, "db");

        let dependents = ledger.dependents_of("api");
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].source_service_id, "web");

        let all = ledger.list_edges();
        assert_eq!(all[0].id, 2);
    }

    #[test]
    fn test_restore_continues_ids() {
        let ledger = ledger();
        ledger.add_edge(spec("web", "api")).unwrap();
        let saved = ledger.snapshot();

        let other = DependencyLedger::new(ledger.registry.clone());
        other.restore(saved);
        let next = other.add_edge(spec("api", "db")).unwrap();
        assert_eq!(next.id, 2);
    }
}
