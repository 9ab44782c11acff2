//! Gateway route table

use crate::matcher::{strip_path_prefix, PathPattern};
use atlas_core::{Error, Result, RoutePatch, RouteRule, RouteSpec};
use atlas_state::ServiceRegistry;
use atlas_topology::{require_gateway, require_service};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A rule together with its compiled pattern
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    /// The stored rule
    pub rule: RouteRule,
    /// Pattern compiled at creation/update time
    pub pattern: PathPattern,
}

impl CompiledRoute {
    fn compile(rule: RouteRule) -> Result<Self> {
        let pattern = PathPattern::parse(&rule.path_pattern)?;
        Ok(Self { rule, pattern })
    }

    /// Path to send upstream for an inbound `path`.
    ///
    /// With `strip_prefix` set, `strip_path` (or the pattern's literal prefix
    /// when `strip_path` is empty) is removed from the front.
    pub fn upstream_path(&self, path: &str) -> String {
        let path = if path.is_empty() { "/" } else { path };
        if !self.rule.strip_prefix {
            return path.to_string();
        }
        let strip = if self.rule.strip_path.is_empty() {
            self.pattern.literal()
        } else {
            self.rule.strip_path.as_str()
        };
        if strip.is_empty() {
            return path.to_string();
        }
        strip_path_prefix(path, strip)
    }
}

/// Route rules grouped by gateway.
///
/// Each gateway's rules are kept in creation order so resolution can break
/// specificity ties by taking the first match. Readers clone an `Arc` out
/// and hold no lock afterwards.
#[derive(Debug, Clone)]
pub struct RouteTable {
    registry: ServiceRegistry,
    by_gateway: Arc<DashMap<String, Vec<Arc<CompiledRoute>>>>,
    gateway_of: Arc<DashMap<u64, String>>,
    next_id: Arc<AtomicU64>,
}

fn normalize_strip_path(strip_path: Option<String>) -> Result<String> {
    let strip_path = strip_path.unwrap_or_default().trim().to_string();
    if !strip_path.is_empty() && !strip_path.starts_with('/') {
        return Err(Error::InvalidRoute(format!(
            "strip_path '{strip_path}' must start with '/'"
        )));
    }
    Ok(strip_path)
}

impl RouteTable {
    /// Create an empty table over `registry`
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry,
            by_gateway: Arc::new(DashMap::new()),
            gateway_of: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a rule.
    ///
    /// Fails with `InvalidRoute` if the gateway is missing or not a gateway,
    /// the target is missing, or the pattern is malformed.
    pub fn add_route(&self, spec: RouteSpec) -> Result<RouteRule> {
        require_gateway(&self.registry, &spec.gateway_service_id, Error::InvalidRoute)?;
        require_service(&self.registry, &spec.target_service_id, "target", Error::InvalidRoute)?;

        let rule = RouteRule {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            gateway_service_id: spec.gateway_service_id,
            path_pattern: spec.path_pattern.trim().to_string(),
            target_service_id: spec.target_service_id,
            strip_prefix: spec.strip_prefix,
            strip_path: normalize_strip_path(spec.strip_path)?,
            enabled: spec.enabled,
            created_at: Utc::now(),
            updated_at: None,
        };
        let compiled = Arc::new(CompiledRoute::compile(rule.clone())?);

        self.gateway_of.insert(rule.id, rule.gateway_service_id.clone());
        self.by_gateway
            .entry(rule.gateway_service_id.clone())
            .or_default()
            .push(compiled);

        info!(
            route_id = rule.id,
            gateway = %rule.gateway_service_id,
            pattern = %rule.path_pattern,
            target = %rule.target_service_id,
            "Route added"
        );
        Ok(rule)
    }

    /// Apply a partial update, re-validating and recompiling
    pub fn update_route(&self, id: u64, patch: RoutePatch) -> Result<RouteRule> {
        let gateway = self
            .gateway_of
            .get(&id)
            .map(|g| g.value().clone())
            .ok_or_else(|| Error::NotFound(format!("route {id}")))?;

        if let Some(target) = &patch.target_service_id {
            require_service(&self.registry, target, "target", Error::InvalidRoute)?;
        }

        let mut rules = self
            .by_gateway
            .get_mut(&gateway)
            .ok_or_else(|| Error::NotFound(format!("route {id}")))?;
        let slot = rules
            .iter_mut()
            .find(|r| r.rule.id == id)
            .ok_or_else(|| Error::NotFound(format!("route {id}")))?;

        let mut rule = slot.rule.clone();
        if let Some(pattern) = patch.path_pattern {
            rule.path_pattern = pattern.trim().to_string();
        }
        if let Some(target) = patch.target_service_id {
            rule.target_service_id = target;
        }
        if let Some(strip_prefix) = patch.strip_prefix {
            rule.strip_prefix = strip_prefix;
        }
        if patch.strip_path.is_some() {
            rule.strip_path = normalize_strip_path(patch.strip_path)?;
        }
        if let Some(enabled) = patch.enabled {
            rule.enabled = enabled;
        }
        rule.updated_at = Some(Utc::now());

        *slot = Arc::new(CompiledRoute::compile(rule.clone())?);
        info!(route_id = id, pattern = %rule.path_pattern, "Route updated");
        Ok(rule)
    }

    /// Delete a rule
    pub fn remove_route(&self, id: u64) -> Result<RouteRule> {
        let (_, gateway) = self
            .gateway_of
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("route {id}")))?;

        let mut removed = None;
        if let Some(mut rules) = self.by_gateway.get_mut(&gateway) {
            if let Some(pos) = rules.iter().position(|r| r.rule.id == id) {
                removed = Some(rules.remove(pos).rule.clone());
            }
        }
        self.by_gateway.remove_if(&gateway, |_, rules| rules.is_empty());

        let removed = removed.ok_or_else(|| Error::NotFound(format!("route {id}")))?;
        info!(route_id = id, gateway = %gateway, "Route removed");
        Ok(removed)
    }

    /// Look up one rule
    pub fn get_route(&self, id: u64) -> Option<RouteRule> {
        let gateway = self.gateway_of.get(&id)?.value().clone();
        let rules = self.by_gateway.get(&gateway)?;
        rules.iter().find(|r| r.rule.id == id).map(|r| r.rule.clone())
    }

    /// Rules, optionally for one gateway and/or enabled only, in id order
    pub fn list_routes(&self, gateway: Option<&str>, enabled_only: bool) -> Vec<RouteRule> {
        let mut rules: Vec<RouteRule> = match gateway {
            Some(gateway) => self
                .by_gateway
                .get(gateway)
                .map(|rules| rules.iter().map(|r| r.rule.clone()).collect())
                .unwrap_or_default(),
            None => self
                .by_gateway
                .iter()
                .flat_map(|entry| entry.value().iter().map(|r| r.rule.clone()).collect::<Vec<_>>())
                .collect(),
        };
        if enabled_only {
            rules.retain(|r| r.enabled);
        }
        rules.sort_by_key(|r| r.id);
        rules
    }

    /// Whether any rule forwards to `target`
    pub fn has_route_to(&self, target: &str) -> bool {
        self.by_gateway
            .iter()
            .any(|entry| entry.value().iter().any(|r| r.rule.target_service_id == target))
    }

    /// Best matching enabled rule of `gateway` for `path`.
    ///
    /// The longest literal prefix wins; among equals the earliest rule wins.
    pub fn resolve(&self, gateway: &str, path: &str) -> Result<Arc<CompiledRoute>> {
        let no_route = || Error::NoRoute {
            gateway: gateway.to_string(),
            path: path.to_string(),
        };

        let rules = self.by_gateway.get(gateway).ok_or_else(no_route)?;
        let mut best: Option<&Arc<CompiledRoute>> = None;
        for route in rules.iter() {
            if !route.rule.enabled || !route.pattern.matches(path) {
                continue;
            }
            let better = match best {
                Some(current) => route.pattern.specificity() > current.pattern.specificity(),
                None => true,
            };
            if better {
                best = Some(route);
            }
        }

        let route = best.cloned().ok_or_else(no_route)?;
        debug!(
            gateway = %gateway,
            path = %path,
            route_id = route.rule.id,
            target = %route.rule.target_service_id,
            "Route resolved"
        );
        Ok(route)
    }

    /// All rules in id order, for persistence
    pub fn snapshot(&self) -> Vec<RouteRule> {
        self.list_routes(None, false)
    }

    /// Replace the content with restored rules.
    ///
    /// Rules whose pattern no longer compiles are dropped and logged.
    pub fn restore(&self, mut restored: Vec<RouteRule>) {
        self.by_gateway.clear();
        self.gateway_of.clear();
        restored.sort_by_key(|r| r.id);

        let mut max_id = 0;
        for rule in restored {
            max_id = max_id.max(rule.id);
            let id = rule.id;
            match CompiledRoute::compile(rule) {
                Ok(compiled) => {
                    let gateway = compiled.rule.gateway_service_id.clone();
                    self.gateway_of.insert(id, gateway.clone());
                    self.by_gateway
                        .entry(gateway)
                        .or_default()
                        .push(Arc::new(compiled));
                }
                Err(e) => tracing::warn!(route_id = id, error = %e, "Dropping unrestorable route"),
            }
        }
        self.next_id.store(max_id + 1, Ordering::SeqCst);
        debug!(count = self.gateway_of.len(), "Restored route rules");
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.gateway_of.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.gateway_of.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::ServiceDescriptor;

    fn table() -> RouteTable {
        let registry = ServiceRegistry::new();
        let mut gw = ServiceDescriptor::new("Edge", "127.0.0.1", 9100);
        gw.is_gateway = true;
        registry.upsert("edge", gw, Utc::now());
        for id in ["svc-a", "svc-b"] {
            registry.upsert(id, ServiceDescriptor::new(id, "127.0.0.1", 8000), Utc::now());
        }
        RouteTable::new(registry)
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = table();
        table.add_route(RouteSpec::new("edge", "/docs/*", "svc-a")).unwrap();
        table.add_route(RouteSpec::new("edge", "/docs/admin/*", "svc-b")).unwrap();

        let hit = table.resolve("edge", "/docs/admin/x").unwrap();
        assert_eq!(hit.rule.target_service_id, "svc-b");
        let hit = table.resolve("edge", "/docs/x").unwrap();
        assert_eq!(hit.rule.target_service_id, "svc-a");
    }

    #[test]
    fn test_ties_go_to_first_created() {
        let table = table();
        table.add_route(RouteSpec::new("edge", "/docs/*", "svc-a")).unwrap();
        table.add_route(RouteSpec::new("edge", "/docs/**", "svc-b")).unwrap();

        let hit = table.resolve("edge", "/docs/x").unwrap();
        assert_eq!(hit.rule.target_service_id, "svc-a");
    }

    #[test]
    fn test_no_route() {
        let table = table();
        table.add_route(RouteSpec::new("edge", "/docs/*", "svc-a")).unwrap();

        let err = table.resolve("edge", "/api/x").unwrap_err();
        assert!(matches!(err, Error::NoRoute { .. }));
        assert!(matches!(
            table.resolve("unknown-gw", "/docs").unwrap_err(),
            Error::NoRoute { .. }
        ));
    }

    #[test]
    fn test_disabled_rules_never_match() {
        let table = table();
        let rule = table.add_route(RouteSpec::new("edge", "/docs/*", "svc-a")).unwrap();
        table
            .update_route(
                rule.id,
                RoutePatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(table.resolve("edge", "/docs/x").is_err());
        assert!(table.list_routes(Some("edge"), true).is_empty());
        assert_eq!(table.list_routes(Some("edge"), false).len(), 1);
    }

    #[test]
    fn test_strip_prefix_rewrite() {
        let table = table();
        table
            .add_route(RouteSpec::new("edge", "/docs/*", "svc-a").strip("/docs"))
            .unwrap();
        let hit = table.resolve("edge", "/docs/file.pdf").unwrap();
        assert_eq!(hit.upstream_path("/docs/file.pdf"), "/file.pdf");
        assert_eq!(hit.upstream_path("/docs"), "/");
    }

    #[test]
    fn test_empty_strip_path_uses_matched_literal() {
        let table = table();
        table
            .add_route(RouteSpec::new("edge", "/svc-a/**", "svc-a").strip(""))
            .unwrap();
        let hit = table.resolve("edge", "/svc-a/api/items").unwrap();
        assert_eq!(hit.upstream_path("/svc-a/api/items"), "/api/items");
    }

    #[test]
    fn test_without_strip_path_is_unchanged() {
        let table = table();
        table.add_route(RouteSpec::new("edge", "/docs/*", "svc-a")).unwrap();
        let hit = table.resolve("edge", "/docs/file.pdf").unwrap();
        assert_eq!(hit.upstream_path("/docs/file.pdf"), "/docs/file.pdf");
    }

    #[test]
    fn test_add_route_validation() {
        let table = table();
        assert!(matches!(
            table
                .add_route(RouteSpec::new("svc-a", "/x/*", "svc-b"))
                .unwrap_err(),
            Error::InvalidRoute(_)
        ));
        assert!(matches!(
            table
                .add_route(RouteSpec::new("edge", "/x/*", "ghost"))
                .unwrap_err(),
            Error::InvalidRoute(_)
        ));
        assert!(matches!(
            table
                .add_route(RouteSpec::new("edge", "/x/*/y", "svc-a"))
                .unwrap_err(),
            Error::InvalidRoute(_)
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_update_recompiles_pattern() {
        let table = table();
        let rule = table.add_route(RouteSpec::new("edge", "/docs/*", "svc-a")).unwrap();
        let updated = table
            .update_route(
                rule.id,
                RoutePatch {
                    path_pattern: Some("/manuals/*".to_string()),
                    target_service_id: Some("svc-b".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated.updated_at.is_some());
        assert!(table.resolve("edge", "/docs/x").is_err());
        assert_eq!(
            table.resolve("edge", "/manuals/x").unwrap().rule.target_service_id,
            "svc-b"
        );

        assert!(matches!(
            table
                .update_route(
                    rule.id,
                    RoutePatch {
                        path_pattern: Some("bad".to_string()),
                        ..Default::default()
                    }
                )
                .unwrap_err(),
            Error::InvalidRoute(_)
        ));
        assert!(matches!(
            table.update_route(99, RoutePatch::default()).unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_remove_and_restore() {
        let table = table();
        let first = table.add_route(RouteSpec::new("edge", "/a/*", "svc-a")).unwrap();
        table.add_route(RouteSpec::new("edge", "/b/*", "svc-b")).unwrap();

        assert_eq!(table.remove_route(first.id).unwrap().id, first.id);
        assert!(matches!(
            table.remove_route(first.id).unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(table.get_route(first.id).is_none());

        let saved = table.snapshot();
        let restored = RouteTable::new(table.registry.clone());
        restored.restore(saved);
        assert_eq!(restored.len(), 1);
        let next = restored
            .add_route(RouteSpec::new("edge", "/c/*", "svc-a"))
            .unwrap();
        assert_eq!(next.id, 3);
        assert!(restored.has_route_to("svc-b"));
    }
}
