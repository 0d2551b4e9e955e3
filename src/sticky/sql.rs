// src/sticky/sql.rs
use super::store::StickyStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

/// Durable `StickyStore` backed by the `sticky_assignments` table (spec §6
/// "Persisted state layout"). Single-writer-per-key semantics are provided
/// by the connection pool serializing writes to SQLite; a real multi-writer
/// backend (Postgres) would use `ON CONFLICT DO UPDATE` the same way.
pub struct SqlStickyStore {
    pool: SqlitePool,
}

impl SqlStickyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StickyStore for SqlStickyStore {
    async fn lookup(&self, sticky_id: &str, tier: &str) -> Option<String> {
        let row = sqlx::query("SELECT client_id FROM sticky_assignments WHERE sticky_id = ? AND tier = ?")
            .bind(sticky_id)
            .bind(tier)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "sticky lookup failed, treating as no binding");
                None
            })?;
        row.try_get::<String, _>("client_id").ok()
    }

    async fn lookup_any_tier(&self, sticky_id: &str) -> Option<String> {
        let row = sqlx::query(
            "SELECT client_id FROM sticky_assignments WHERE sticky_id = ? ORDER BY last_used DESC LIMIT 1",
        )
        .bind(sticky_id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "sticky lookup_any_tier failed, treating as no binding");
            None
        })?;
        row.try_get::<String, _>("client_id").ok()
    }

    async fn upsert(
        &self,
        sticky_id: &str,
        tier: &str,
        backend_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let result = sqlx::query(
            "INSERT INTO sticky_assignments (sticky_id, tier, client_id, created_at, last_used) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(sticky_id, tier) DO UPDATE SET client_id = excluded.client_id, last_used = excluded.last_used",
        )
        .bind(sticky_id)
        .bind(tier)
        .bind(backend_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, sticky_id, tier, "sticky upsert failed, request still succeeds");
        }
        Ok(())
    }

    async fn touch(&self, sticky_id: &str, tier: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let result = sqlx::query("UPDATE sticky_assignments SET last_used = ? WHERE sticky_id = ? AND tier = ?")
            .bind(now.to_rfc3339())
            .bind(sticky_id)
            .bind(tier)
            .execute(&self.pool)
            .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, sticky_id, tier, "sticky touch failed");
        }
        Ok(())
    }

    async fn invalidate_by_backend(&self, backend_id: &str) -> anyhow::Result<()> {
        let result = sqlx::query("DELETE FROM sticky_assignments WHERE client_id = ?")
            .bind(backend_id)
            .execute(&self.pool)
            .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, backend_id, "sticky invalidate_by_backend failed");
        }
        Ok(())
    }
}
