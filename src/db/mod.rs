// src/db/mod.rs
mod archive;

pub use archive::{retention_sweep_loop, ClientsWriter, StatsHistoryWriter};

use anyhow::{Context, Result};
use sqlx::sqlite::{SqlitePoolOptions, SqliteConnectOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Connect to the configured relational backing store and ensure the three
/// tables spec §6 "Persisted state layout" names exist.
pub async fn connect(dsn: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(dsn)
        .with_context(|| format!("invalid database dsn: {dsn}"))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .context("failed to connect to database")?;

    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            hostname TEXT NOT NULL,
            address TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            capacity_json TEXT NOT NULL,
            endpoints_json TEXT NOT NULL,
            registered_at TEXT NOT NULL,
            last_seen TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS stats (
            client_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            cores_json TEXT NOT NULL,
            memory_used_gb REAL NOT NULL,
            memory_total_gb REAL NOT NULL,
            disk_used_gb REAL NOT NULL,
            disk_total_gb REAL NOT NULL,
            gpu_json TEXT NOT NULL,
            PRIMARY KEY (client_id, timestamp)
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stats_client_ts ON stats(client_id, timestamp DESC)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sticky_assignments (
            sticky_id TEXT NOT NULL,
            tier TEXT NOT NULL,
            client_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_used TEXT NOT NULL,
            PRIMARY KEY (sticky_id, tier)
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sticky_last_used ON sticky_assignments(last_used)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sticky_client_id ON sticky_assignments(client_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sticky_sticky_id ON sticky_assignments(sticky_id)")
        .execute(pool)
        .await?;

    Ok(())
}
