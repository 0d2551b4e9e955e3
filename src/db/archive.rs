// src/db/archive.rs
use crate::registry::{BackendDescriptor, BackendStats};
use crate::shutdown::Shutdown;
use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{info, warn};

/// Best-effort mirror of `register` into the `clients` table (spec §6).
/// The in-memory [`crate::registry::Registry`] remains authoritative for
/// routing; a failure here is logged and never fails the request (spec
/// §7 "Propagation policy").
#[derive(Clone)]
pub struct ClientsWriter {
    pool: SqlitePool,
}

impl ClientsWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn write(&self, desc: &BackendDescriptor) {
        let capacity_json = serde_json::to_string(&desc.capacity).unwrap_or_default();
        let endpoints_json = serde_json::to_string(&desc.endpoints).unwrap_or_default();

        let result = sqlx::query(
            "INSERT INTO clients (id, hostname, address, latitude, longitude, capacity_json, endpoints_json, registered_at, last_seen) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET hostname = excluded.hostname, address = excluded.address, \
             latitude = excluded.latitude, longitude = excluded.longitude, capacity_json = excluded.capacity_json, \
             endpoints_json = excluded.endpoints_json, last_seen = excluded.last_seen",
        )
        .bind(&desc.id)
        .bind(&desc.hostname)
        .bind(&desc.address)
        .bind(desc.location.latitude)
        .bind(desc.location.longitude)
        .bind(capacity_json)
        .bind(endpoints_json)
        .bind(desc.registered_at.to_rfc3339())
        .bind(desc.last_seen.to_rfc3339())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(error = %e, backend = %desc.id, "failed to archive client row");
        }
    }
}

/// Append-only stats history archive (spec §6: "stats rows are a history
/// archive"; routing itself reads the in-memory Registry, never this
/// table).
#[derive(Clone)]
pub struct StatsHistoryWriter {
    pool: SqlitePool,
}

impl StatsHistoryWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn write(&self, backend_id: &str, stats: &BackendStats) {
        let cores_json = serde_json::to_string(&stats.cpu_core_usage_pct).unwrap_or_default();
        let gpu_json = serde_json::to_string(&stats.gpus).unwrap_or_default();

        let result = sqlx::query(
            "INSERT OR REPLACE INTO stats (client_id, timestamp, cores_json, memory_used_gb, memory_total_gb, disk_used_gb, disk_total_gb, gpu_json) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(backend_id)
        .bind(stats.timestamp.to_rfc3339())
        .bind(cores_json)
        .bind(stats.memory_used_gb)
        .bind(stats.memory_total_gb)
        .bind(stats.disk_used_gb)
        .bind(stats.disk_total_gb)
        .bind(gpu_json)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(error = %e, backend = %backend_id, "failed to archive stats row");
        }
    }
}

/// Periodically trims `stats` rows older than the configured retention
/// horizon (spec §6: "A background cleanup may trim stats older than a
/// retention horizon").
pub async fn retention_sweep_loop(
    pool: SqlitePool,
    retention: Duration,
    sweep_interval: Duration,
    shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
                let result = sqlx::query("DELETE FROM stats WHERE timestamp < ?")
                    .bind(cutoff.to_rfc3339())
                    .execute(&pool)
                    .await;
                match result {
                    Ok(r) => info!(rows_deleted = r.rows_affected(), "trimmed stats history"),
                    Err(e) => warn!(error = %e, "stats retention sweep failed"),
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
