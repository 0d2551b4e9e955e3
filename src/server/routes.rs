// src/server/routes.rs
//! Handlers for the non-proxy JSON API surface (spec §6).

use super::state::AppState;
use crate::error::AppError;
use crate::health::HealthStatus;
use crate::registry::{RegisterRequest, StatsRequest};
use crate::scorer::{SelectionError, SelectionOutcome, SelectionRequest};
use chrono::Utc;
use hyper::{Body, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use uuid::Uuid;

async fn read_json_body<T: serde::de::DeserializeOwned>(
    req: Request<Body>,
    max_bytes: usize,
) -> Result<T, AppError> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read body: {e}")))?;
    if bytes.len() > max_bytes {
        return Err(AppError::PayloadTooLarge);
    }
    serde_json::from_slice(&bytes).map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))
}

fn json_response(status: StatusCode, body: impl Serialize) -> Response<Body> {
    let payload = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

pub async fn register(state: &AppState, req: Request<Body>) -> Result<Response<Body>, AppError> {
    let body: RegisterRequest = read_json_body(req, state.config.server.max_body_bytes).await?;
    let id = body.id.clone();
    let now = Utc::now();
    state
        .registry
        .register(body, now)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    if let (Some(writer), Some(entry)) = (&state.clients_writer, state.registry.get(&id)) {
        writer.write(&entry.desc.load_full()).await;
    }

    Ok(json_response(StatusCode::OK, serde_json::json!({"status": "registered"})))
}

pub async fn stats(state: &AppState, req: Request<Body>) -> Result<Response<Body>, AppError> {
    let body: StatsRequest = read_json_body(req, state.config.server.max_body_bytes).await?;
    let id = body.id.clone();
    let now = Utc::now();
    state.registry.update_stats(body, now).map_err(|e| match e {
        crate::registry::RegistryError::UnknownBackend(_) => AppError::NotFound,
        other => AppError::BadRequest(other.to_string()),
    })?;

    if let (Some(writer), Some(entry)) = (&state.stats_writer, state.registry.get(&id)) {
        if let Some(stats) = entry.stats.load_full().as_ref() {
            writer.write(&id, stats).await;
        }
    }

    Ok(json_response(StatusCode::OK, serde_json::json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
struct RouteRequestBody {
    tier: String,
    #[serde(default)]
    client_ip: String,
    client_lat: Option<f64>,
    client_lon: Option<f64>,
}

#[derive(Debug, Serialize)]
struct RouteResponseBody {
    client_id: String,
    endpoint: String,
    hostname: String,
    distance_km: f64,
}

impl From<SelectionOutcome> for RouteResponseBody {
    fn from(o: SelectionOutcome) -> Self {
        Self {
            client_id: o.backend_id,
            endpoint: o.endpoint_url.to_string(),
            hostname: o.hostname,
            distance_km: o.distance_km,
        }
    }
}

pub async fn route(state: &AppState, req: Request<Body>) -> Result<Response<Body>, AppError> {
    let sticky_header = &state.config.sticky.header;
    let sticky_id = (!sticky_header.is_empty())
        .then(|| req.headers().get(sticky_header.as_str()).cloned())
        .flatten()
        .and_then(|v| v.to_str().ok().map(str::to_string))
        .filter(|s| !s.is_empty());

    let body: RouteRequestBody = read_json_body(req, state.config.server.max_body_bytes).await?;
    let client_coords = match (body.client_lat, body.client_lon) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => {
            if body.client_ip.is_empty() {
                None
            } else {
                let ip: IpAddr = body.client_ip.parse().map_err(|_| {
                    AppError::Selection(SelectionError::InvalidInput(format!(
                        "invalid client_ip: {}",
                        body.client_ip
                    )))
                })?;
                let coords = state.geolocate.locate(ip).await;
                if coords == (0.0, 0.0) {
                    None
                } else {
                    Some(coords)
                }
            }
        }
    };

    let outcome = state
        .scorer
        .select(SelectionRequest {
            tier_name: body.tier,
            client_coords,
            sticky_id,
            request_id: Uuid::new_v4().to_string(),
        })
        .await;

    match outcome {
        Ok(o) => Ok(json_response(StatusCode::OK, RouteResponseBody::from(o))),
        Err(e) => Err(AppError::Selection(e)),
    }
}

#[derive(Debug, Serialize)]
struct HealthResponseBody {
    status: &'static str,
    timestamp: chrono::DateTime<Utc>,
    total_clients: usize,
    active_clients: usize,
}

pub async fn health(state: &AppState) -> Result<Response<Body>, AppError> {
    let now = Utc::now();
    let stale_window = state.config.registry.stale_window();
    let body = HealthResponseBody {
        status: "ok",
        timestamp: now,
        total_clients: state.registry.len(),
        active_clients: state.registry.active_count(now, stale_window),
    };
    Ok(json_response(StatusCode::OK, body))
}

#[derive(Debug, Serialize)]
struct ClientSummary {
    id: String,
    hostname: String,
    address: String,
    latitude: f64,
    longitude: f64,
    capacity: crate::registry::Capacity,
    last_seen: chrono::DateTime<Utc>,
    health: &'static str,
    ewma_latency_ms: Option<f64>,
    pending: PendingSummary,
}

#[derive(Debug, Serialize)]
struct PendingSummary {
    cpu_cores_reserved: u32,
    mem_gb: f64,
    disk_gb: f64,
    gpu_count: u32,
}

pub async fn clients(state: &AppState) -> Result<Response<Body>, AppError> {
    let summaries: Vec<ClientSummary> = state
        .registry
        .all()
        .iter()
        .map(|entry| {
            let desc = entry.desc.load_full();
            let health = entry.health.read().expect("health lock poisoned").clone();
            let totals = state.ledger.totals(&entry.id);
            ClientSummary {
                id: entry.id.clone(),
                hostname: desc.hostname.clone(),
                address: desc.address.clone(),
                latitude: desc.location.latitude,
                longitude: desc.location.longitude,
                capacity: desc.capacity.clone(),
                last_seen: desc.last_seen,
                health: match health.status {
                    HealthStatus::Unknown => "unknown",
                    HealthStatus::Healthy => "healthy",
                    HealthStatus::Unhealthy => "unhealthy",
                },
                ewma_latency_ms: health.ewma_latency_ms,
                pending: PendingSummary {
                    cpu_cores_reserved: totals.cpu_cores_reserved,
                    mem_gb: totals.mem_gb,
                    disk_gb: totals.disk_gb,
                    gpu_count: totals.gpu_count,
                },
            }
        })
        .collect();

    Ok(json_response(StatusCode::OK, summaries))
}

/// Administrative removal (spec §3: "Explicit removal is allowed only
/// through an administrative operation").
pub async fn remove_backend(state: &AppState, backend_id: &str) -> Result<Response<Body>, AppError> {
    if state.registry.remove(backend_id) {
        let _ = state.sticky.invalidate_by_backend(backend_id).await;
        Ok(json_response(StatusCode::OK, serde_json::json!({"status": "removed"})))
    } else {
        Err(AppError::NotFound)
    }
}

pub async fn proxy(state: &AppState, req: Request<Body>, peer_addr: SocketAddr) -> Result<Response<Body>, AppError> {
    state.proxy.handle(req, peer_addr).await
}
