// src/proxy/proxy.rs
use super::forward::{self, ProxyClient};
use super::stream::{apply_flush_policy, FlushPolicy};
use crate::config::{ExtractorConfig, ProxyConfig};
use crate::error::AppError;
use crate::extractor::{self, ExtractedIdentity};
use crate::geo::Geolocate;
use crate::metrics::MetricsCollector;
use crate::registry::Registry;
use crate::scorer::{Scorer, SelectionRequest};
use crate::tier::TierCatalog;
use hyper::{Body, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Drives a single proxied request end to end: extract identity, select a
/// backend, forward, apply the flush policy (spec §4.7).
pub struct Proxy {
    registry: Registry,
    scorer: Scorer,
    geolocate: Arc<dyn Geolocate>,
    client: ProxyClient,
    extractor_config: ExtractorConfig,
    proxy_config: ProxyConfig,
    sticky_header: Option<String>,
    tiers: Arc<TierCatalog>,
    request_timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Registry,
        scorer: Scorer,
        geolocate: Arc<dyn Geolocate>,
        extractor_config: ExtractorConfig,
        proxy_config: ProxyConfig,
        sticky_header: Option<String>,
        tiers: Arc<TierCatalog>,
        request_timeout: Duration,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            registry,
            scorer,
            geolocate,
            client: forward::build_client(),
            extractor_config,
            proxy_config,
            sticky_header,
            tiers,
            request_timeout,
            metrics,
        }
    }

    pub async fn handle(&self, req: Request<Body>, peer_addr: SocketAddr) -> Result<Response<Body>, AppError> {
        let start = Instant::now();
        let request_id = Uuid::new_v4().to_string();

        let (req, identity) = extractor::extract(
            req,
            &self.extractor_config,
            self.sticky_header.as_deref(),
            self.proxy_config.trusted_proxy_header.as_deref(),
            self.tiers.default_tier_name(),
            peer_addr,
        )
        .await
        .map_err(AppError::Internal)?;

        let ExtractedIdentity {
            tier_name,
            sticky_id,
            client_ip,
        } = identity;

        let client_coords = self.geolocate.locate(client_ip).await;
        let client_coords = if client_coords == (0.0, 0.0) {
            None
        } else {
            Some(client_coords)
        };

        let outcome = self
            .scorer
            .select(SelectionRequest {
                tier_name: tier_name.clone(),
                client_coords,
                sticky_id: sticky_id.clone(),
                request_id: request_id.clone(),
            })
            .await;

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.record_selection_outcome("rejected", e.reason_code());
                }
                return Err(AppError::Selection(e));
            }
        };

        if let Some(m) = &self.metrics {
            m.record_selection_outcome("selected", &outcome.backend_id);
        }

        let desc = self
            .registry
            .get(&outcome.backend_id)
            .map(|entry| entry.desc.load_full())
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("selected backend vanished from registry")))?;

        let resp = forward::forward(&self.client, &desc, req, self.request_timeout).await;

        if let Some(m) = &self.metrics {
            m.record_proxy_latency(&outcome.backend_id, start.elapsed());
        }

        let mut resp = resp?;
        let policy = FlushPolicy::from_millis(self.proxy_config.flush_interval_ms);
        let (parts, body) = resp.into_parts();
        resp = Response::from_parts(parts, apply_flush_policy(body, policy));
        resp.headers_mut().insert(
            "x-request-id",
            request_id.parse().unwrap_or_else(|_| "invalid".parse().unwrap()),
        );
        Ok(resp)
    }
}
