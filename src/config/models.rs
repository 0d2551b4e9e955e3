// src/config/models.rs
use crate::tier::Tier;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    pub tiers: TiersConfig,
    #[serde(default)]
    pub sticky: StickyConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub pending: PendingConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.tiers.catalog.is_empty() {
            bail!("tiers.catalog must declare at least one tier");
        }
        if !self.tiers.catalog.contains_key(&self.tiers.default_tier) {
            bail!(
                "tiers.default_tier '{}' is not declared in tiers.catalog",
                self.tiers.default_tier
            );
        }
        for (name, tier) in &self.tiers.catalog {
            tier.validate().map_err(|e| anyhow::anyhow!(e))?;
            if name.is_empty() {
                bail!("tier names must not be empty");
            }
        }
        if self.health_check.interval_secs == 0 || self.health_check.timeout_secs == 0 {
            bail!("health_check interval/timeout must be positive");
        }
        if self.health_check.healthy_threshold == 0 || self.health_check.unhealthy_threshold == 0 {
            bail!("health_check thresholds must be positive");
        }
        if !(0.0..=1.0).contains(&self.health_check.ewma_alpha) {
            bail!("health_check.ewma_alpha must be in [0,1]");
        }
        if self.pending.ttl_seconds == 0 || self.pending.sweep_interval_seconds == 0 {
            bail!("pending ttl/sweep_interval must be positive");
        }
        if self.registry.stale_minutes == 0 {
            bail!("registry.stale_minutes must be positive");
        }
        if self.rate_limit.enabled && self.rate_limit.requests_per_second == 0 {
            bail!("rate_limit.requests_per_second must be positive when enabled");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub read_header_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub shutdown_timeout_seconds: u64,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            read_header_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            shutdown_timeout_seconds: 30,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted `X-API-Key` values. Empty means auth is disabled.
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    pub fn enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 50,
            burst: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiersConfig {
    pub catalog: HashMap<String, Tier>,
    #[serde(default = "default_tier_name")]
    pub default_tier: String,
}

fn default_tier_name() -> String {
    "lite".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StickyConfig {
    /// Header carrying the sticky key. Empty disables sticky sessions entirely.
    pub header: String,
    pub affinity_enabled: bool,
}

impl Default for StickyConfig {
    fn default() -> Self {
        Self {
            header: "X-Session-ID".to_string(),
            affinity_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub mode: ProbeMode,
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    pub ewma_alpha: f64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            mode: ProbeMode::Http,
            path: "/health".to_string(),
            interval_secs: 10,
            timeout_secs: 2,
            healthy_threshold: 2,
            unhealthy_threshold: 3,
            ewma_alpha: 0.3,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    Tcp,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingConfig {
    pub ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 120,
            sweep_interval_seconds: 15,
        }
    }
}

impl PendingConfig {
    pub fn ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub stale_minutes: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { stale_minutes: 5 }
    }
}

impl RegistryConfig {
    pub fn stale_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_minutes as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Path prefixes that are forwarded through the reverse proxy rather
    /// than handled by the built-in API routes.
    pub prefixes: Vec<String>,
    /// <0 flush every chunk immediately, 0 never flush early (buffer the
    /// full response), >0 coalesce chunks for that many milliseconds.
    pub flush_interval_ms: i64,
    /// Optional header to trust for the client's real IP (e.g. behind a
    /// load balancer of load balancers). Empty means use the socket peer.
    pub trusted_proxy_header: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            prefixes: vec!["/".to_string()],
            flush_interval_ms: -1,
            trusted_proxy_header: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
            path: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. `sqlite://router.db` or `sqlite::memory:`.
    pub dsn: String,
    pub stats_retention_hours: u64,
    pub retention_sweep_interval_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: "sqlite::memory:".to_string(),
            stats_retention_hours: 24 * 7,
            retention_sweep_interval_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub tier_field_name: String,
    pub tier_header: String,
    pub max_body_peek_bytes: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            tier_field_name: "tier".to_string(),
            tier_header: "X-Tier".to_string(),
            max_body_peek_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Cores/GPUs at or above this averaged usage % are considered busy.
    pub cpu_busy_threshold_pct: f64,
    pub gpu_busy_threshold_pct: f64,
    pub cpu_weight: f64,
    pub memory_weight: f64,
    pub gpu_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            cpu_busy_threshold_pct: 80.0,
            gpu_busy_threshold_pct: 80.0,
            cpu_weight: 1.0,
            memory_weight: 1.0,
            gpu_weight: 1.5,
        }
    }
}
