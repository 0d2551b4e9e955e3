// src/scorer/selector.rs
use super::error::SelectionError;
use super::haversine::haversine_km;
use crate::config::ScoringConfig;
use crate::health::HealthState;
use crate::ledger::{PendingLedger, PendingTotals};
use crate::metrics::MetricsCollector;
use crate::registry::{BackendDescriptor, BackendStats, GpuSample, Registry};
use crate::sticky::StickyStore;
use crate::tier::{Tier, TierCatalog};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Input to [`Scorer::select`] (spec §4.4).
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub tier_name: String,
    pub client_coords: Option<(f64, f64)>,
    pub sticky_id: Option<String>,
    pub request_id: String,
}

/// A routing decision: which backend, and which of its endpoints.
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub backend_id: String,
    pub hostname: String,
    pub endpoint_url: Url,
    pub distance_km: f64,
}

/// Implements spec §4.4's seven-step selection procedure.
#[derive(Clone)]
pub struct Scorer {
    registry: Registry,
    ledger: PendingLedger,
    sticky: Arc<dyn StickyStore>,
    tiers: Arc<TierCatalog>,
    scoring: ScoringConfig,
    stale_window: chrono::Duration,
    sticky_affinity_enabled: bool,
    pending_ttl: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Scorer {
    pub fn new(
        registry: Registry,
        ledger: PendingLedger,
        sticky: Arc<dyn StickyStore>,
        tiers: Arc<TierCatalog>,
        scoring: ScoringConfig,
        stale_window: chrono::Duration,
        sticky_affinity_enabled: bool,
        pending_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            ledger,
            sticky,
            tiers,
            scoring,
            stale_window,
            sticky_affinity_enabled,
            pending_ttl,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn select(&self, req: SelectionRequest) -> Result<SelectionOutcome, SelectionError> {
        let tier = self
            .tiers
            .get(&req.tier_name)
            .ok_or_else(|| SelectionError::UnknownTier(req.tier_name.clone()))?
            .clone();

        let now = Utc::now();
        let client_coords = req.client_coords.unwrap_or((0.0, 0.0));

        if let Some(sticky_id) = req.sticky_id.as_deref().filter(|s| !s.is_empty()) {
            if let Some(outcome) = self
                .try_sticky_fast_path(sticky_id, &tier, client_coords, now)
                .await
            {
                return Ok(outcome);
            }
        }

        let candidates = self.registry.list_active(now, self.stale_window);
        if candidates.is_empty() {
            return Err(SelectionError::NoActiveBackends);
        }

        let mut scored: Vec<(f64, String, f64, BackendDescriptor)> = Vec::new();
        for entry in &candidates {
            let stats_arc = entry.stats.load_full();
            let Some(stats) = stats_arc.as_ref() else {
                continue;
            };
            let desc = entry.desc.load_full();
            let health = entry.health.read().expect("health lock poisoned").clone();
            let totals = self.ledger.totals(&entry.id);

            if let Some((score, distance)) =
                candidate_score(&desc, stats, &totals, &tier, client_coords, &health, &self.scoring)
            {
                scored.push((score, entry.id.clone(), distance, (*desc).clone()));
            }
        }

        if scored.is_empty() {
            return Err(SelectionError::NoCapacity);
        }

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let (_, backend_id, distance, desc) = scored.into_iter().next().expect("checked non-empty above");

        let dedup_key = req
            .sticky_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|sid| format!("{sid}:{}", tier.name))
            .unwrap_or_else(|| req.request_id.clone());
        self.ledger
            .reserve(&self.registry, &backend_id, &dedup_key, &tier, self.pending_ttl);

        if let Some(sid) = req.sticky_id.as_deref().filter(|s| !s.is_empty()) {
            let _ = self.sticky.upsert(sid, &tier.name, &backend_id, now).await;
        }

        Ok(SelectionOutcome {
            backend_id,
            hostname: desc.hostname.clone(),
            endpoint_url: primary_endpoint(&desc),
            distance_km: distance,
        })
    }

    async fn try_sticky_fast_path(
        &self,
        sticky_id: &str,
        tier: &Tier,
        client_coords: (f64, f64),
        now: chrono::DateTime<Utc>,
    ) -> Option<SelectionOutcome> {
        let exact = self.sticky.lookup(sticky_id, &tier.name).await;
        let (backend_id, is_cross_tier_hit) = match exact {
            Some(id) => (id, false),
            None if self.sticky_affinity_enabled => {
                (self.sticky.lookup_any_tier(sticky_id).await?, true)
            }
            None => return None,
        };

        let entry = self.registry.get(&backend_id)?;
        if entry.is_stale(now, self.stale_window) {
            return None;
        }
        if entry.health_status() != crate::health::HealthStatus::Healthy {
            return None;
        }

        let desc = entry.desc.load_full();
        let stats = entry.stats.load_full();
        let stats = (*stats).as_ref()?;
        let health = entry.health.read().expect("health lock poisoned").clone();
        let totals = self.ledger.totals(&backend_id);

        let (_, distance) =
            candidate_score(&desc, stats, &totals, tier, client_coords, &health, &self.scoring)?;

        let _ = self.sticky.touch(sticky_id, &tier.name, now).await;
        let dedup_key = format!("{sticky_id}:{}", tier.name);
        self.ledger
            .reserve(&self.registry, &backend_id, &dedup_key, tier, self.pending_ttl);
        if is_cross_tier_hit {
            let _ = self.sticky.upsert(sticky_id, &tier.name, &backend_id, now).await;
        }

        Some(SelectionOutcome {
            backend_id,
            hostname: desc.hostname.clone(),
            endpoint_url: primary_endpoint(&desc),
            distance_km: distance,
        })
    }
}

fn primary_endpoint(desc: &BackendDescriptor) -> Url {
    desc.endpoints
        .first()
        .map(|e| e.url.clone())
        .unwrap_or_else(|| desc.address.parse().unwrap_or_else(|_| Url::parse("http://invalid").unwrap()))
}

/// Average usage of the `k` least-loaded entries in `usage` (spec §4.4
/// step 5, §8 E6: "avg_cpu_least_loaded is the mean of the tier.vcpu
/// least-loaded cores"). CPU only — the GPU term is a plain mean, see
/// `avg_gpu_utilization`.
fn least_loaded_avg(usage: &[f64], k: usize) -> f64 {
    if k == 0 || usage.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = usage.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let take = k.min(sorted.len());
    if take == 0 {
        return 0.0;
    }
    sorted[..take].iter().sum::<f64>() / take as f64
}

/// Mean utilization across all of the backend's GPUs (spec §4.4 step 5:
/// "1.5 x avg_gpu_utilization_pct_if_gpu_tier" — unlike the CPU term, the
/// spec does not restrict this to the least-utilized `tier.gpu` devices).
fn avg_gpu_utilization(gpus: &[GpuSample]) -> f64 {
    if gpus.is_empty() {
        return 0.0;
    }
    gpus.iter().map(|g| g.utilization_pct).sum::<f64>() / gpus.len() as f64
}

/// Applies the tier filter (step 3) and, if admitted, the composite score
/// (step 4-5). Returns `None` if the candidate does not have capacity.
#[allow(clippy::too_many_arguments)]
fn candidate_score(
    desc: &BackendDescriptor,
    stats: &BackendStats,
    pending: &PendingTotals,
    tier: &Tier,
    client_coords: (f64, f64),
    health: &HealthState,
    scoring: &ScoringConfig,
) -> Option<(f64, f64)> {
    let mem_available = (stats.memory_total_gb - stats.memory_used_gb).max(0.0) - pending.mem_gb;
    let disk_available = (stats.disk_total_gb - stats.disk_used_gb).max(0.0) - pending.disk_gb;
    let cpu_available = stats
        .cpu_core_usage_pct
        .iter()
        .filter(|&&u| u < scoring.cpu_busy_threshold_pct)
        .count() as f64
        - pending.cpu_cores_reserved as f64;
    let gpu_available = stats
        .gpus
        .iter()
        .filter(|g| g.utilization_pct < scoring.gpu_busy_threshold_pct && g.free_memory_gb() >= tier.gpu_memory_gb)
        .count() as f64
        - pending.gpu_count as f64;

    if mem_available < tier.memory_gb
        || disk_available < tier.storage_gb
        || cpu_available < tier.vcpu as f64
        || (tier.gpu > 0 && gpu_available < tier.gpu as f64)
    {
        return None;
    }

    let distance = if client_coords == (0.0, 0.0) {
        0.0
    } else {
        haversine_km(client_coords, desc.location.as_tuple())
    };

    let cpu_term = least_loaded_avg(&stats.cpu_core_usage_pct, tier.vcpu as usize);
    let mem_term = stats.memory_usage_pct();
    let gpu_term = if tier.gpu > 0 {
        avg_gpu_utilization(&stats.gpus)
    } else {
        0.0
    };
    let latency = health.ewma_latency_ms.unwrap_or(0.0);

    let score = distance
        + scoring.cpu_weight * cpu_term
        + scoring.memory_weight * mem_term
        + scoring.gpu_weight * gpu_term
        + latency;

    Some((score, distance))
}
