// src/sticky/store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// `(sticky_id, tier) -> backend_id` affinity mapping (spec §3
/// "StickyBinding", §4.3). A storage error on write is logged by the
/// caller and never fails the request; a lookup error is treated as "no
/// binding" — implementations should prefer returning `Ok(None)`/`Ok(())`
/// over propagating transient errors where the spec allows it, but the
/// trait still returns `anyhow::Result` so callers can log what happened.
#[async_trait]
pub trait StickyStore: Send + Sync {
    async fn lookup(&self, sticky_id: &str, tier: &str) -> Option<String>;

    /// Affinity extension (spec §4.3): find a binding for `sticky_id`
    /// under *any* tier. Only consulted when `sticky_affinity_enabled`.
    async fn lookup_any_tier(&self, sticky_id: &str) -> Option<String>;

    async fn upsert(
        &self,
        sticky_id: &str,
        tier: &str,
        backend_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    async fn touch(&self, sticky_id: &str, tier: &str, now: DateTime<Utc>) -> anyhow::Result<()>;

    async fn invalidate_by_backend(&self, backend_id: &str) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
struct Binding {
    backend_id: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    #[allow(dead_code)]
    last_used: DateTime<Utc>,
}

/// A non-persistent `StickyStore` used by tests and as a fallback when no
/// database DSN is configured. Production deployments should use
/// [`crate::sticky::SqlStickyStore`] for the durability spec §3 requires.
#[derive(Default)]
pub struct InMemoryStickyStore {
    bindings: DashMap<(String, String), Binding>,
}

impl InMemoryStickyStore {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }
}

#[async_trait]
impl StickyStore for InMemoryStickyStore {
    async fn lookup(&self, sticky_id: &str, tier: &str) -> Option<String> {
        self.bindings
            .get(&(sticky_id.to_string(), tier.to_string()))
            .map(|b| b.backend_id.clone())
    }

    async fn lookup_any_tier(&self, sticky_id: &str) -> Option<String> {
        self.bindings
            .iter()
            .find(|e| e.key().0 == sticky_id)
            .map(|e| e.value().backend_id.clone())
    }

    async fn upsert(
        &self,
        sticky_id: &str,
        tier: &str,
        backend_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.bindings.insert(
            (sticky_id.to_string(), tier.to_string()),
            Binding {
                backend_id: backend_id.to_string(),
                created_at: now,
                last_used: now,
            },
        );
        Ok(())
    }

    async fn touch(&self, sticky_id: &str, tier: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(mut b) = self.bindings.get_mut(&(sticky_id.to_string(), tier.to_string())) {
            b.last_used = now;
        }
        Ok(())
    }

    async fn invalidate_by_backend(&self, backend_id: &str) -> anyhow::Result<()> {
        self.bindings.retain(|_, b| b.backend_id != backend_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_any_tier_finds_cross_tier_binding() {
        let store = InMemoryStickyStore::new();
        store.upsert("s1", "lite", "b1", Utc::now()).await.unwrap();
        assert_eq!(store.lookup("s1", "medium").await, None);
        assert_eq!(store.lookup_any_tier("s1").await, Some("b1".to_string()));
    }

    #[tokio::test]
    async fn invalidate_by_backend_removes_all_its_bindings() {
        let store = InMemoryStickyStore::new();
        store.upsert("s1", "lite", "b1", Utc::now()).await.unwrap();
        store.upsert("s2", "medium", "b1", Utc::now()).await.unwrap();
        store.upsert("s3", "medium", "b2", Utc::now()).await.unwrap();

        store.invalidate_by_backend("b1").await.unwrap();

        assert_eq!(store.lookup("s1", "lite").await, None);
        assert_eq!(store.lookup("s2", "medium").await, None);
        assert_eq!(store.lookup("s3", "medium").await, Some("b2".to_string()));
    }
}
