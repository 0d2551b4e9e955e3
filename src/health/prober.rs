// src/health/prober.rs
use crate::config::{HealthCheckConfig, ProbeMode};
use crate::metrics::MetricsCollector;
use crate::registry::{BackendEntry, Registry};
use crate::shutdown::Shutdown;
use crate::sticky::StickyStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

/// Periodic TCP/HTTP prober driving each backend's [`HealthState`](super::HealthState).
///
/// Owned entirely by this component (spec §3 "Ownership": "the Health
/// prober exclusively writes HealthState"). On a transition to unhealthy it
/// invalidates the backend's sticky bindings before returning (spec §8
/// invariant 5).
pub struct Prober {
    config: HealthCheckConfig,
    registry: Registry,
    sticky: Arc<dyn StickyStore>,
    client: reqwest::Client,
    shutdown: Shutdown,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Prober {
    pub fn new(
        config: HealthCheckConfig,
        registry: Registry,
        sticky: Arc<dyn StickyStore>,
        shutdown: Shutdown,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .expect("failed to build health-check HTTP client");
        Self {
            config,
            registry,
            sticky,
            client,
            shutdown,
            metrics,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.config.interval());
        let mut shutdown_rx = self.shutdown.subscribe();

        info!(interval = ?self.config.interval(), "starting health prober");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_all().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("health prober shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn probe_all(&self) {
        let backends = self.registry.all();
        let total = backends.len();
        let tasks: Vec<_> = backends
            .into_iter()
            .map(|entry| {
                let this = self.clone_probe_context();
                tokio::spawn(async move { this.probe_one(entry).await })
            })
            .collect();
        futures::future::join_all(tasks).await;

        if let Some(metrics) = &self.metrics {
            let healthy = self
                .registry
                .all()
                .iter()
                .filter(|e| e.health_status() == crate::health::HealthStatus::Healthy)
                .count();
            metrics.set_backend_counts(healthy, total);
        }
    }

    /// `Prober` isn't `Clone` itself (it owns a `Shutdown` watch sender we
    /// don't want duplicated); probing needs the shared bits only.
    fn clone_probe_context(&self) -> ProbeContext {
        ProbeContext {
            config: self.config.clone(),
            registry: self.registry.clone(),
            sticky: self.sticky.clone(),
            client: self.client.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

struct ProbeContext {
    config: HealthCheckConfig,
    registry: Registry,
    sticky: Arc<dyn StickyStore>,
    client: reqwest::Client,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ProbeContext {
    async fn probe_one(&self, entry: Arc<BackendEntry>) {
        let Ok(_permit) = entry.probe_permit.try_acquire() else {
            debug!(backend = %entry.id, "probe already in flight, skipping tick");
            return;
        };

        let desc = entry.desc.load_full();
        let start = Instant::now();
        let result = match self.config.mode {
            ProbeMode::Tcp => self.probe_tcp(&desc.address).await,
            ProbeMode::Http => self.probe_http(&desc).await,
        };
        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let now = Utc::now();

        let transitioned_unhealthy = {
            let mut health = entry.health.write().expect("health lock poisoned");
            match result {
                Ok(()) => {
                    let became_healthy =
                        health.record_success(elapsed_ms, self.config.ewma_alpha, self.config.healthy_threshold, now);
                    if became_healthy {
                        info!(backend = %entry.id, "backend is now healthy");
                    }
                    false
                }
                Err(ref reason) => {
                    let became_unhealthy =
                        health.record_failure(self.config.unhealthy_threshold, now);
                    if became_unhealthy {
                        warn!(backend = %entry.id, reason, "backend is now unhealthy");
                    }
                    became_unhealthy
                }
            }
        };

        if let Some(metrics) = &self.metrics {
            let outcome = if result.is_ok() { "success" } else { "failure" };
            metrics.record_probe(&entry.id, outcome, elapsed);
            metrics.set_backend_health(&entry.id, entry.health_status());
        }

        if transitioned_unhealthy {
            if let Err(e) = self.sticky.invalidate_by_backend(&entry.id).await {
                warn!(backend = %entry.id, error = %e, "failed to invalidate sticky bindings");
            }
        }
    }

    async fn probe_tcp(&self, address: &str) -> Result<(), String> {
        match timeout(self.config.timeout(), TcpStream::connect(address)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(format!("tcp connect failed: {e}")),
            Err(_) => Err("tcp connect timed out".to_string()),
        }
    }

    async fn probe_http(&self, desc: &crate::registry::BackendDescriptor) -> Result<(), String> {
        let Some(primary) = desc.endpoints.first() else {
            return Err("backend has no endpoints".to_string());
        };
        let url = primary
            .url
            .join(&self.config.path)
            .map_err(|e| format!("invalid health path: {e}"))?;

        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => Ok(()),
            Ok(resp) => Err(format!("HTTP {}", resp.status())),
            Err(e) if e.is_timeout() => Err("HTTP probe timed out".to_string()),
            Err(e) => Err(format!("HTTP probe error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Capacity, Endpoint, RegisterRequest};
    use crate::sticky::InMemoryStickyStore;

    fn register(registry: &Registry, id: &str, url: &str) {
        registry
            .register(
                RegisterRequest {
                    id: id.to_string(),
                    hostname: "h".to_string(),
                    address: "127.0.0.1:1".to_string(),
                    latitude: 0.0,
                    longitude: 0.0,
                    capacity: Capacity {
                        vcpu: 1,
                        memory_gb: 1.0,
                        storage_gb: 1.0,
                        gpu_count: 0,
                        gpu_memory_gb: 0.0,
                        gpu_models: vec![],
                    },
                    endpoints: vec![Endpoint {
                        url: url.parse().unwrap(),
                        path_prefixes: vec!["/".to_string()],
                    }],
                },
                Utc::now(),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn http_probe_failure_marks_unhealthy_after_threshold_and_invalidates_sticky() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/health")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let registry = Registry::new();
        register(&registry, "b1", &server.url());

        let sticky = Arc::new(InMemoryStickyStore::new());
        sticky
            .upsert("s1", "lite", "b1", Utc::now())
            .await
            .unwrap();

        let mut config = HealthCheckConfig::default();
        config.unhealthy_threshold = 3;
        config.healthy_threshold = 1;

        let shutdown = Shutdown::new();
        let prober = Arc::new(Prober::new(config, registry.clone(), sticky.clone(), shutdown, None));
        let ctx = prober.clone_probe_context();
        let entry = registry.get("b1").unwrap();

        ctx.probe_one(entry.clone()).await;
        ctx.probe_one(entry.clone()).await;
        assert_eq!(entry.health_status(), crate::health::HealthStatus::Unknown);
        ctx.probe_one(entry.clone()).await;

        assert_eq!(entry.health_status(), crate::health::HealthStatus::Unhealthy);
        assert!(sticky.lookup("s1", "lite").await.is_none());
    }
}
