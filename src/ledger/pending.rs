// src/ledger/pending.rs
use crate::registry::Registry;
use crate::tier::Tier;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A short-lived reservation charged against one backend for one tier,
/// filed under a dedup key so repeated requests for the same sticky
/// session collapse into a single charge (spec §3 "PendingAllocation",
/// §8 invariant 8).
#[derive(Debug, Clone)]
pub struct PendingAllocation {
    pub dedup_key: String,
    pub backend_id: String,
    pub vcpu: u32,
    pub memory_gb: f64,
    pub storage_gb: f64,
    pub gpu: u32,
    pub gpu_memory_gb: f64,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl PendingAllocation {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }

    fn from_tier(dedup_key: String, backend_id: String, tier: &Tier, ttl: Duration, now: Instant) -> Self {
        Self {
            dedup_key,
            backend_id,
            vcpu: tier.vcpu,
            memory_gb: tier.memory_gb,
            storage_gb: tier.storage_gb,
            gpu: tier.gpu,
            gpu_memory_gb: tier.gpu_memory_gb,
            created_at: now,
            ttl,
        }
    }
}

/// Sum of non-expired reservations charged against one backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingTotals {
    pub cpu_cores_reserved: u32,
    pub mem_gb: f64,
    pub disk_gb: f64,
    pub gpu_count: u32,
    pub gpu_mem_gb: f64,
}

/// Per-backend ledger of ephemeral reservations. Never persisted across
/// restarts (spec §1 Non-goals, §4.2). Each backend's reservation list is
/// behind its own DashMap shard, so `reserve`/`totals` complete under a
/// single lock acquisition with no nesting (spec §5).
#[derive(Clone)]
pub struct PendingLedger {
    per_backend: Arc<DashMap<String, Vec<PendingAllocation>>>,
    default_ttl: Duration,
}

impl PendingLedger {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            per_backend: Arc::new(DashMap::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Reserve `tier`'s resources against `backend_id` under `dedup_key`.
    /// Idempotent: an unexpired reservation with the same key is left in
    /// place rather than duplicated. Returns `false` only when the backend
    /// is not known to `registry` (spec §4.2).
    pub fn reserve(
        &self,
        registry: &Registry,
        backend_id: &str,
        dedup_key: &str,
        tier: &Tier,
        ttl: Duration,
    ) -> bool {
        if !registry.exists(backend_id) {
            return false;
        }
        let now = Instant::now();
        let mut entries = self.per_backend.entry(backend_id.to_string()).or_default();
        entries.retain(|r| !r.is_expired(now));

        if entries.iter().any(|r| r.dedup_key == dedup_key) {
            return true;
        }

        entries.push(PendingAllocation::from_tier(
            dedup_key.to_string(),
            backend_id.to_string(),
            tier,
            ttl,
            now,
        ));
        true
    }

    /// Sum of non-expired reservations for `backend_id`. Lazily sweeps
    /// expired entries as a side effect (spec §4.2).
    pub fn totals(&self, backend_id: &str) -> PendingTotals {
        let now = Instant::now();
        let Some(mut entries) = self.per_backend.get_mut(backend_id) else {
            return PendingTotals::default();
        };
        entries.retain(|r| !r.is_expired(now));

        entries.iter().fold(PendingTotals::default(), |mut acc, r| {
            acc.cpu_cores_reserved += r.vcpu;
            acc.mem_gb += r.memory_gb;
            acc.disk_gb += r.storage_gb;
            acc.gpu_count += r.gpu;
            acc.gpu_mem_gb += r.gpu_memory_gb;
            acc
        })
    }

    /// Remove every expired reservation across all backends. Intended to
    /// also run on a periodic timer (spec §4.2) via [`crate::shutdown::Shutdown`]-aware
    /// callers.
    pub fn sweep(&self, now: Instant) {
        for mut entries in self.per_backend.iter_mut() {
            entries.retain(|r| !r.is_expired(now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Capacity, Endpoint, RegisterRequest};
    use chrono::Utc;
    use std::thread::sleep;

    fn registry_with(id: &str) -> Registry {
        let registry = Registry::new();
        registry
            .register(
                RegisterRequest {
                    id: id.to_string(),
                    hostname: "h".to_string(),
                    address: "127.0.0.1:1".to_string(),
                    latitude: 0.0,
                    longitude: 0.0,
                    capacity: Capacity {
                        vcpu: 8,
                        memory_gb: 16.0,
                        storage_gb: 100.0,
                        gpu_count: 0,
                        gpu_memory_gb: 0.0,
                        gpu_models: vec![],
                    },
                    endpoints: vec![Endpoint {
                        url: "http://127.0.0.1:1".parse().unwrap(),
                        path_prefixes: vec!["/".to_string()],
                    }],
                },
                Utc::now(),
            )
            .unwrap();
        registry
    }

    fn tier() -> Tier {
        Tier {
            name: "medium".to_string(),
            vcpu: 2,
            memory_gb: 4.0,
            storage_gb: 20.0,
            gpu: 0,
            gpu_memory_gb: 0.0,
        }
    }

    #[test]
    fn reserve_is_idempotent_for_same_dedup_key() {
        let registry = registry_with("b1");
        let ledger = PendingLedger::new(Duration::from_secs(120));
        assert!(ledger.reserve(&registry, "b1", "s1:medium", &tier(), Duration::from_secs(120)));
        assert!(ledger.reserve(&registry, "b1", "s1:medium", &tier(), Duration::from_secs(120)));

        let totals = ledger.totals("b1");
        assert_eq!(totals.cpu_cores_reserved, 2);
        assert_eq!(totals.mem_gb, 4.0);
    }

    #[test]
    fn reserve_returns_false_for_unknown_backend() {
        let registry = registry_with("b1");
        let ledger = PendingLedger::new(Duration::from_secs(120));
        assert!(!ledger.reserve(&registry, "does-not-exist", "k", &tier(), Duration::from_secs(120)));
    }

    #[test]
    fn expired_reservations_are_not_counted() {
        let registry = registry_with("b1");
        let ledger = PendingLedger::new(Duration::from_millis(10));
        ledger.reserve(&registry, "b1", "k1", &tier(), Duration::from_millis(10));
        sleep(Duration::from_millis(30));
        let totals = ledger.totals("b1");
        assert_eq!(totals.cpu_cores_reserved, 0);
    }

    #[test]
    fn different_dedup_keys_accumulate() {
        let registry = registry_with("b1");
        let ledger = PendingLedger::new(Duration::from_secs(120));
        ledger.reserve(&registry, "b1", "req-1", &tier(), Duration::from_secs(120));
        ledger.reserve(&registry, "b1", "req-2", &tier(), Duration::from_secs(120));
        let totals = ledger.totals("b1");
        assert_eq!(totals.cpu_cores_reserved, 4);
    }
}
