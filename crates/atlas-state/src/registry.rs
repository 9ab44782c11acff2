//! In-memory ServiceRecord store with per-record locking

use atlas_core::{HealthState, HealthStatus, ServiceDescriptor, ServiceRecord, ServiceStats};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of [`ServiceRegistry::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A new record was created
    Created,
    /// An existing record's descriptor was replaced
    Replaced,
}

/// A single slot; the mutex serializes every write to one record
#[derive(Debug)]
struct Slot {
    record: Mutex<ServiceRecord>,
}

impl Slot {
    fn new(record: ServiceRecord) -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(record),
        })
    }
}

/// Authoritative store of service records.
///
/// The map itself is sharded (`DashMap`); each record additionally sits behind
/// its own mutex. Callers never hold a map shard while running user code:
/// the slot's `Arc` is cloned out first, then its record lock is taken.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    slots: Arc<DashMap<String, Arc<Slot>>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> Option<Arc<Slot>> {
        self.slots.get(id).map(|entry| entry.value().clone())
    }

    /// Register a service, or replace the descriptor of an existing one.
    ///
    /// Health fields of an existing record are left untouched.
    pub fn upsert(
        &self,
        id: &str,
        descriptor: ServiceDescriptor,
        now: DateTime<Utc>,
    ) -> (ServiceRecord, Upsert) {
        match self.slots.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let mut record = entry.get().record.lock();
                record.descriptor = descriptor;
                record.updated_at = now;
                debug!(service_id = %id, "Replaced service descriptor");
                (record.clone(), Upsert::Replaced)
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let record = ServiceRecord::new(id, descriptor, now);
                entry.insert(Slot::new(record.clone()));
                debug!(service_id = %id, "Registered service");
                (record, Upsert::Created)
            }
        }
    }

    /// Replace the descriptor of an existing record via `f`.
    ///
    /// Returns `None` if the id is unknown.
    pub fn update_descriptor<F>(&self, id: &str, now: DateTime<Utc>, f: F) -> Option<ServiceRecord>
    where
        F: FnOnce(&ServiceDescriptor) -> ServiceDescriptor,
    {
        let slot = self.slot(id)?;
        let mut record = slot.record.lock();
        record.descriptor = f(&record.descriptor);
        record.updated_at = now;
        Some(record.clone())
    }

    /// Apply `f` to the health fields of one record under its lock.
    ///
    /// `updated_at` is bumped only if `f` changed anything.
    /// Returns `None` if the id is unknown.
    pub fn update_health<R, F>(&self, id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut HealthState) -> R,
    {
        let slot = self.slot(id)?;
        let mut record = slot.record.lock();
        let before = record.health.clone();
        let result = f(&mut record.health);
        if record.health != before {
            record.updated_at = Utc::now();
            trace!(service_id = %id, status = %record.health.status, "Health fields updated");
        }
        Some(result)
    }

    /// Remove a record
    pub fn remove(&self, id: &str) -> Option<ServiceRecord> {
        let (_, slot) = self.slots.remove(id)?;
        let record = slot.record.lock().clone();
        debug!(service_id = %id, "Deregistered service");
        Some(record)
    }

    /// Snapshot of one record
    pub fn get(&self, id: &str) -> Option<ServiceRecord> {
        self.slot(id).map(|slot| slot.record.lock().clone())
    }

    /// Current status of one record
    pub fn status(&self, id: &str) -> Option<HealthStatus> {
        self.slot(id).map(|slot| slot.record.lock().health.status)
    }

    /// Whether an id is registered
    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Snapshot of every record, sorted by id
    pub fn list(&self) -> Vec<ServiceRecord> {
        let slots: Vec<Arc<Slot>> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut records: Vec<ServiceRecord> =
            slots.iter().map(|slot| slot.record.lock().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Replace the whole content with restored records
    pub fn restore(&self, records: Vec<ServiceRecord>) {
        self.slots.clear();
        for record in records {
            self.slots.insert(record.id.clone(), Slot::new(record));
        }
        debug!(count = self.slots.len(), "Restored service records");
    }

    /// Aggregate status counts
    pub fn stats(&self) -> ServiceStats {
        let mut stats = ServiceStats::default();
        for record in self.list() {
            stats.total += 1;
            match record.health.status {
                HealthStatus::Healthy => stats.healthy += 1,
                HealthStatus::Unhealthy => stats.unhealthy += 1,
                HealthStatus::Unknown => stats.unknown += 1,
            }
            if record.descriptor.is_gateway {
                stats.gateways += 1;
            }
        }
        stats
    }

    /// Number of registered services
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
