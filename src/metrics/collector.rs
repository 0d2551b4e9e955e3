// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self { registry, collector })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        buffer
    }
}

/// Domain metrics for the routing engine, the probe loop and the proxy
/// front-end (spec §4.4, §4.5, §4.7).
pub struct MetricsCollector {
    pub selection_outcomes_total: IntCounterVec,
    pub proxy_request_duration_seconds: HistogramVec,

    pub pending_reservations: IntGaugeVec,

    pub sticky_lookups_total: IntCounterVec,

    pub probe_duration_seconds: HistogramVec,
    pub backend_health_status: IntGaugeVec,

    pub healthy_backends: IntGauge,
    pub total_backends: IntGauge,
    pub active_connections: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let selection_outcomes_total = IntCounterVec::new(
            Opts::new(
                "router_selection_outcomes_total",
                "Routing decisions by outcome (selected/rejected) and detail (backend id or reject reason)",
            ),
            &["outcome", "detail"],
        )?;
        registry.register(Box::new(selection_outcomes_total.clone()))?;

        let proxy_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "router_proxy_request_duration_seconds",
                "End-to-end proxied request duration",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(proxy_request_duration_seconds.clone()))?;

        let pending_reservations = IntGaugeVec::new(
            Opts::new(
                "router_pending_reservations",
                "Non-expired pending-allocation count per backend",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(pending_reservations.clone()))?;

        let sticky_lookups_total = IntCounterVec::new(
            Opts::new(
                "router_sticky_lookups_total",
                "Sticky-store lookups by result (hit/miss/cross_tier_hit)",
            ),
            &["result"],
        )?;
        registry.register(Box::new(sticky_lookups_total.clone()))?;

        let probe_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "router_probe_duration_seconds",
                "Health probe round-trip time",
            ),
            &["backend", "outcome"],
        )?;
        registry.register(Box::new(probe_duration_seconds.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "router_backend_health_status",
                "Backend health (0=unknown, 1=healthy, 2=unhealthy)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let healthy_backends = IntGauge::new("router_healthy_backends", "Number of healthy backends")?;
        registry.register(Box::new(healthy_backends.clone()))?;

        let total_backends = IntGauge::new("router_total_backends", "Total registered backends")?;
        registry.register(Box::new(total_backends.clone()))?;

        let active_connections =
            IntGauge::new("router_active_connections", "In-flight proxied connections")?;
        registry.register(Box::new(active_connections.clone()))?;

        Ok(Self {
            selection_outcomes_total,
            proxy_request_duration_seconds,
            pending_reservations,
            sticky_lookups_total,
            probe_duration_seconds,
            backend_health_status,
            healthy_backends,
            total_backends,
            active_connections,
        })
    }

    pub fn record_selection_outcome(&self, outcome: &str, detail: &str) {
        self.selection_outcomes_total
            .with_label_values(&[outcome, detail])
            .inc();
    }

    pub fn record_proxy_latency(&self, backend: &str, duration: Duration) {
        self.proxy_request_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn set_pending_reservations(&self, backend: &str, count: i64) {
        self.pending_reservations.with_label_values(&[backend]).set(count);
    }

    pub fn record_sticky_lookup(&self, result: &str) {
        self.sticky_lookups_total.with_label_values(&[result]).inc();
    }

    pub fn record_probe(&self, backend: &str, outcome: &str, duration: Duration) {
        self.probe_duration_seconds
            .with_label_values(&[backend, outcome])
            .observe(duration.as_secs_f64());
    }

    pub fn set_backend_health(&self, backend: &str, status: crate::health::HealthStatus) {
        let value = match status {
            crate::health::HealthStatus::Unknown => 0,
            crate::health::HealthStatus::Healthy => 1,
            crate::health::HealthStatus::Unhealthy => 2,
        };
        self.backend_health_status.with_label_values(&[backend]).set(value);
    }

    pub fn set_backend_counts(&self, healthy: usize, total: usize) {
        self.healthy_backends.set(healthy as i64);
        self.total_backends.set(total as i64);
    }

    pub fn increment_active_connections(&self) {
        self.active_connections.inc();
    }

    pub fn decrement_active_connections(&self) {
        self.active_connections.dec();
    }
}
