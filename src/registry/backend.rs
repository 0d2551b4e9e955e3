// src/registry/backend.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Total advertised capacity of a backend. See spec §3 "Backend".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capacity {
    pub vcpu: u32,
    pub memory_gb: f64,
    pub storage_gb: f64,
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default)]
    pub gpu_memory_gb: f64,
    #[serde(default)]
    pub gpu_models: Vec<String>,
}

impl Capacity {
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_gb < 0.0 || self.storage_gb < 0.0 || self.gpu_memory_gb < 0.0 {
            return Err("capacity fields must be non-negative".to_string());
        }
        Ok(())
    }
}

/// An HTTP endpoint a backend exposes and the URL path prefixes it is
/// authoritative for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: Url,
    #[serde(default)]
    pub path_prefixes: Vec<String>,
}

/// Geographic coordinates, decimal degrees, WGS-84.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn as_tuple(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

/// Wire payload accepted by `POST /register`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    pub hostname: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity: Capacity,
    pub endpoints: Vec<Endpoint>,
}

/// A registered backend's descriptive (slow-changing) attributes.
///
/// Health and latest stats live alongside this in a `BackendEntry`, not on
/// this type, so a `register` call never disturbs them (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub id: String,
    pub hostname: String,
    pub address: String,
    pub location: GeoPoint,
    pub capacity: Capacity,
    pub endpoints: Vec<Endpoint>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl BackendDescriptor {
    pub fn from_register(req: RegisterRequest, now: DateTime<Utc>) -> Result<Self, String> {
        if req.id.trim().is_empty() {
            return Err("backend id must not be empty".to_string());
        }
        req.capacity.validate()?;
        if req.endpoints.is_empty() {
            return Err("backend must declare at least one endpoint".to_string());
        }
        Ok(Self {
            id: req.id,
            hostname: req.hostname,
            address: req.address,
            location: GeoPoint {
                latitude: req.latitude,
                longitude: req.longitude,
            },
            capacity: req.capacity,
            endpoints: req.endpoints,
            registered_at: now,
            last_seen: now,
        })
    }

    /// Produce an updated descriptor for a re-`register` of an existing id:
    /// address/capacity/endpoints refresh, `registered_at` is preserved.
    pub fn merged_update(&self, req: RegisterRequest, now: DateTime<Utc>) -> Result<Self, String> {
        req.capacity.validate()?;
        if req.endpoints.is_empty() {
            return Err("backend must declare at least one endpoint".to_string());
        }
        Ok(Self {
            id: self.id.clone(),
            hostname: req.hostname,
            address: req.address,
            location: GeoPoint {
                latitude: req.latitude,
                longitude: req.longitude,
            },
            capacity: req.capacity,
            endpoints: req.endpoints,
            registered_at: self.registered_at,
            last_seen: now,
        })
    }
}
