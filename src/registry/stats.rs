// src/registry/stats.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single GPU's latest averaged telemetry sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSample {
    pub device_id: u32,
    pub name: String,
    pub utilization_pct: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub temperature_c: f64,
    pub power_w: f64,
}

impl GpuSample {
    pub fn free_memory_gb(&self) -> f64 {
        (self.memory_total_gb - self.memory_used_gb).max(0.0)
    }
}

/// Wire payload accepted by `POST /stats`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsRequest {
    pub id: String,
    pub cpu_core_usage_pct: Vec<f64>,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub disk_used_gb: f64,
    pub disk_total_gb: f64,
    #[serde(default)]
    pub gpus: Vec<GpuSample>,
}

/// The latest averaged sample for a backend, 1:1, replaced atomically on
/// each `update_stats` (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStats {
    pub cpu_core_usage_pct: Vec<f64>,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub disk_used_gb: f64,
    pub disk_total_gb: f64,
    pub gpus: Vec<GpuSample>,
    pub timestamp: DateTime<Utc>,
}

impl BackendStats {
    pub fn validate(&self) -> Result<(), String> {
        for pct in &self.cpu_core_usage_pct {
            if !(0.0..=100.0).contains(pct) {
                return Err("per-core CPU usage must be within [0,100]".to_string());
            }
        }
        for gpu in &self.gpus {
            if !(0.0..=100.0).contains(&gpu.utilization_pct) {
                return Err("GPU utilization must be within [0,100]".to_string());
            }
        }
        if self.memory_used_gb < 0.0
            || self.memory_total_gb < 0.0
            || self.disk_used_gb < 0.0
            || self.disk_total_gb < 0.0
        {
            return Err("memory/disk values must be non-negative".to_string());
        }
        Ok(())
    }

    pub fn from_request(req: StatsRequest, timestamp: DateTime<Utc>) -> Result<Self, String> {
        let stats = Self {
            cpu_core_usage_pct: req.cpu_core_usage_pct,
            memory_used_gb: req.memory_used_gb,
            memory_total_gb: req.memory_total_gb,
            disk_used_gb: req.disk_used_gb,
            disk_total_gb: req.disk_total_gb,
            gpus: req.gpus,
            timestamp,
        };
        stats.validate()?;
        Ok(stats)
    }

    pub fn memory_usage_pct(&self) -> f64 {
        if self.memory_total_gb <= 0.0 {
            0.0
        } else {
            100.0 * self.memory_used_gb / self.memory_total_gb
        }
    }
}
