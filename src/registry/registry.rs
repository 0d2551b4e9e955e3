// src/registry/registry.rs
use super::backend::{BackendDescriptor, RegisterRequest};
use super::stats::{BackendStats, StatsRequest};
use crate::health::{HealthState, HealthStatus};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid backend descriptor: {0}")]
    Invalid(String),
    #[error("unknown backend id: {0}")]
    UnknownBackend(String),
}

/// Everything the Registry owns for one backend id. `desc` and `stats` are
/// swapped atomically (pointer-swap semantics, spec §4.1); `health` is a
/// short-critical-section lock the prober writes to (spec §3 "Ownership").
pub struct BackendEntry {
    pub id: String,
    pub desc: ArcSwap<BackendDescriptor>,
    pub stats: ArcSwap<Option<BackendStats>>,
    pub health: RwLock<HealthState>,
    /// Caps the health prober to one in-flight probe per backend (spec §4.5).
    pub probe_permit: Semaphore,
}

impl BackendEntry {
    fn new(desc: BackendDescriptor) -> Self {
        Self {
            id: desc.id.clone(),
            desc: ArcSwap::from_pointee(desc),
            stats: ArcSwap::from_pointee(None),
            health: RwLock::new(HealthState::default()),
            probe_permit: Semaphore::new(1),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_window: chrono::Duration) -> bool {
        now - self.desc.load().last_seen > stale_window
    }

    pub fn health_status(&self) -> HealthStatus {
        self.health.read().expect("health lock poisoned").status
    }
}

/// A read-only view of one backend handed to the scorer / `/clients`.
pub struct BackendSnapshot {
    pub entry: Arc<BackendEntry>,
}

/// In-memory registry of backends: descriptors, latest stats, health.
/// Exclusively owned here; readers (scorer, proxy, `/clients`) only ever
/// see immutable snapshots (spec §3 "Ownership", §5 "Shared-resource policy").
#[derive(Clone)]
pub struct Registry {
    backends: Arc<DashMap<String, Arc<BackendEntry>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            backends: Arc::new(DashMap::new()),
        }
    }

    /// Upsert by id. Preserves HealthState and pending allocations (the
    /// latter are held by the ledger, not here, so they are naturally
    /// untouched) for an existing id.
    pub fn register(&self, req: RegisterRequest, now: DateTime<Utc>) -> Result<(), RegistryError> {
        let id = req.id.clone();
        if let Some(existing) = self.backends.get(&id) {
            let updated = existing
                .desc
                .load()
                .merged_update(req, now)
                .map_err(RegistryError::Invalid)?;
            existing.desc.store(Arc::new(updated));
            return Ok(());
        }

        let desc = BackendDescriptor::from_register(req, now).map_err(RegistryError::Invalid)?;
        self.backends.insert(id, Arc::new(BackendEntry::new(desc)));
        Ok(())
    }

    pub fn update_stats(&self, req: StatsRequest, now: DateTime<Utc>) -> Result<(), RegistryError> {
        let entry = self
            .backends
            .get(&req.id)
            .ok_or_else(|| RegistryError::UnknownBackend(req.id.clone()))?;
        let stats = BackendStats::from_request(req, now).map_err(RegistryError::Invalid)?;
        entry.stats.store(Arc::new(Some(stats)));

        let prior = entry.desc.load();
        if now > prior.last_seen {
            let mut updated = (**prior).clone();
            updated.last_seen = now;
            entry.desc.store(Arc::new(updated));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<BackendEntry>> {
        self.backends.get(id).map(|e| e.value().clone())
    }

    pub fn exists(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    pub fn all(&self) -> Vec<Arc<BackendEntry>> {
        self.backends.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Backends that are not stale and not known-unhealthy.
    pub fn list_active(
        &self,
        now: DateTime<Utc>,
        stale_window: chrono::Duration,
    ) -> Vec<Arc<BackendEntry>> {
        self.backends
            .iter()
            .filter(|e| !e.is_stale(now, stale_window) && e.health_status() != HealthStatus::Unhealthy)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn active_count(&self, now: DateTime<Utc>, stale_window: chrono::Duration) -> usize {
        self.backends
            .iter()
            .filter(|e| !e.is_stale(now, stale_window) && e.health_status() != HealthStatus::Unhealthy)
            .count()
    }

    /// Administrative removal (spec §3: "Explicit removal is allowed only
    /// through an administrative operation").
    pub fn remove(&self, id: &str) -> bool {
        self.backends.remove(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::backend::{Capacity, Endpoint};

    fn req(id: &str) -> RegisterRequest {
        RegisterRequest {
            id: id.to_string(),
            hostname: "h".to_string(),
            address: "127.0.0.1:9000".to_string(),
            latitude: 1.0,
            longitude: 2.0,
            capacity: Capacity {
                vcpu: 4,
                memory_gb: 8.0,
                storage_gb: 40.0,
                gpu_count: 0,
                gpu_memory_gb: 0.0,
                gpu_models: vec![],
            },
            endpoints: vec![Endpoint {
                url: "http://127.0.0.1:9000".parse().unwrap(),
                path_prefixes: vec!["/".to_string()],
            }],
        }
    }

    #[test]
    fn register_is_idempotent_upsert_and_preserves_registered_at() {
        let registry = Registry::new();
        let t0 = Utc::now();
        registry.register(req("a"), t0).unwrap();
        let first_registered_at = registry.get("a").unwrap().desc.load().registered_at;

        let t1 = t0 + chrono::Duration::seconds(5);
        registry.register(req("a"), t1).unwrap();
        let entry = registry.get("a").unwrap();
        assert_eq!(entry.desc.load().registered_at, first_registered_at);
        assert_eq!(entry.desc.load().last_seen, t1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_rejects_missing_id() {
        let registry = Registry::new();
        let mut r = req("");
        r.id = String::new();
        assert!(registry.register(r, Utc::now()).is_err());
    }

    #[test]
    fn update_stats_fails_for_unknown_backend() {
        let registry = Registry::new();
        let stats_req = StatsRequest {
            id: "missing".to_string(),
            cpu_core_usage_pct: vec![10.0],
            memory_used_gb: 1.0,
            memory_total_gb: 8.0,
            disk_used_gb: 1.0,
            disk_total_gb: 40.0,
            gpus: vec![],
        };
        assert!(matches!(
            registry.update_stats(stats_req, Utc::now()),
            Err(RegistryError::UnknownBackend(_))
        ));
    }

    #[test]
    fn list_active_excludes_stale_backends() {
        let registry = Registry::new();
        let old = Utc::now() - chrono::Duration::hours(1);
        registry.register(req("stale"), old).unwrap();
        let active = registry.list_active(Utc::now(), chrono::Duration::minutes(5));
        assert!(active.is_empty());
    }
}
