// src/server/state.rs
use crate::admission::RateLimiterFront;
use crate::config::Config;
use crate::db::{ClientsWriter, StatsHistoryWriter};
use crate::geo::Geolocate;
use crate::ledger::PendingLedger;
use crate::metrics::MetricsCollector;
use crate::proxy::Proxy;
use crate::registry::Registry;
use crate::scorer::Scorer;
use crate::sticky::StickyStore;
use crate::tier::TierCatalog;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Everything a request handler needs, built once in `main` and shared
/// across every connection (spec §9 "Global mutable state ... expose it
/// via dependency injection into handlers").
pub struct AppState {
    pub config: Config,
    pub registry: Registry,
    pub ledger: PendingLedger,
    pub sticky: Arc<dyn StickyStore>,
    pub scorer: Scorer,
    pub proxy: Proxy,
    pub tiers: Arc<TierCatalog>,
    pub rate_limiter: RateLimiterFront,
    pub metrics: Option<Arc<MetricsCollector>>,
    pub clients_writer: Option<ClientsWriter>,
    pub stats_writer: Option<StatsHistoryWriter>,
    /// Injected `(lat,lon) <- client_ip` collaborator (spec §4.6), used by
    /// the `/route` JSON endpoint when the caller supplies `client_ip` but
    /// not explicit coordinates. The proxy front-end has its own copy
    /// (`Proxy` is constructed with one directly) — this is the same kind
    /// of collaborator, wired separately because `/route` bypasses `Proxy`.
    pub geolocate: Arc<dyn Geolocate>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}
