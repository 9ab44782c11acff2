//! Durable snapshot of the registry, ledger and route table

use atlas_core::{DependencyEdge, RouteRule, ServiceRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything needed to restore the registry after a restart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Service records including health fields
    #[serde(default)]
    pub services: Vec<ServiceRecord>,

    /// Dependency edges
    #[serde(default)]
    pub edges: Vec<DependencyEdge>,

    /// Gateway route rules
    #[serde(default)]
    pub routes: Vec<RouteRule>,

    /// When the snapshot was taken
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Whether the snapshot holds no data
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.edges.is_empty() && self.routes.is_empty()
    }
}
