// tests/load_balancer_tests.rs
//! Integration tests driving the routing engine through its public API
//! (Registry + PendingLedger + InMemoryStickyStore + Scorer), mirroring
//! the end-to-end scenarios in spec §8.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tiered_router::config::ScoringConfig;
use tiered_router::ledger::PendingLedger;
use tiered_router::registry::{Capacity, Endpoint, RegisterRequest, Registry, StatsRequest};
use tiered_router::scorer::{Scorer, SelectionError, SelectionRequest};
use tiered_router::sticky::{InMemoryStickyStore, StickyStore};
use tiered_router::tier::{Tier, TierCatalog};

fn medium_tier_catalog() -> Arc<TierCatalog> {
    let mut tiers = HashMap::new();
    tiers.insert(
        "medium".to_string(),
        Tier {
            name: "medium".to_string(),
            vcpu: 2,
            memory_gb: 4.0,
            storage_gb: 20.0,
            gpu: 0,
            gpu_memory_gb: 0.0,
        },
    );
    Arc::new(TierCatalog::new(tiers, "medium".to_string()).unwrap())
}

fn register_backend(registry: &Registry, id: &str, lat: f64, lon: f64) {
    registry
        .register(
            RegisterRequest {
                id: id.to_string(),
                hostname: format!("host-{id}"),
                address: "127.0.0.1:1".to_string(),
                latitude: lat,
                longitude: lon,
                capacity: Capacity {
                    vcpu: 4,
                    memory_gb: 8.0,
                    storage_gb: 40.0,
                    gpu_count: 0,
                    gpu_memory_gb: 0.0,
                    gpu_models: vec![],
                },
                endpoints: vec![Endpoint {
                    url: format!("http://{id}:9000").parse().unwrap(),
                    path_prefixes: vec!["/".to_string()],
                }],
            },
            Utc::now(),
        )
        .unwrap();
}

fn push_stats(registry: &Registry, id: &str, cores: Vec<f64>, mem_used_gb: f64) {
    registry
        .update_stats(
            StatsRequest {
                id: id.to_string(),
                cpu_core_usage_pct: cores,
                memory_used_gb: mem_used_gb,
                memory_total_gb: 8.0,
                disk_used_gb: 10.0,
                disk_total_gb: 40.0,
                gpus: vec![],
            },
            Utc::now(),
        )
        .unwrap();
}

fn mark_healthy(registry: &Registry, id: &str) {
    let entry = registry.get(id).unwrap();
    let mut health = entry.health.write().unwrap();
    health.record_success(1.0, 0.3, 1, Utc::now());
    health.record_success(1.0, 0.3, 1, Utc::now());
}

fn scorer(registry: Registry, sticky: Arc<dyn StickyStore>) -> Scorer {
    Scorer::new(
        registry,
        PendingLedger::new(Duration::from_secs(120)),
        sticky,
        medium_tier_catalog(),
        ScoringConfig::default(),
        chrono::Duration::minutes(5),
        true,
        Duration::from_secs(120),
    )
}

#[tokio::test]
async fn unregistered_backend_yields_no_active_backends() {
    let registry = Registry::new();
    let s = scorer(registry, Arc::new(InMemoryStickyStore::new()));
    let result = s
        .select(SelectionRequest {
            tier_name: "medium".to_string(),
            client_coords: None,
            sticky_id: None,
            request_id: "r1".to_string(),
        })
        .await;
    assert_eq!(result.unwrap_err(), SelectionError::NoActiveBackends);
}

#[tokio::test]
async fn unhealthy_backend_is_excluded_from_selection() {
    let registry = Registry::new();
    register_backend(&registry, "a", 0.0, 0.0);
    push_stats(&registry, "a", vec![10.0; 4], 1.0);
    // Never marked healthy: status stays `unknown`, which is not `healthy`.
    let s = scorer(registry, Arc::new(InMemoryStickyStore::new()));
    let result = s
        .select(SelectionRequest {
            tier_name: "medium".to_string(),
            client_coords: None,
            sticky_id: None,
            request_id: "r1".to_string(),
        })
        .await;
    assert_eq!(result.unwrap_err(), SelectionError::NoActiveBackends);
}

#[tokio::test]
async fn unknown_tier_name_is_rejected() {
    let registry = Registry::new();
    register_backend(&registry, "a", 0.0, 0.0);
    push_stats(&registry, "a", vec![10.0; 4], 1.0);
    mark_healthy(&registry, "a");

    let s = scorer(registry, Arc::new(InMemoryStickyStore::new()));
    let result = s
        .select(SelectionRequest {
            tier_name: "nonexistent".to_string(),
            client_coords: None,
            sticky_id: None,
            request_id: "r1".to_string(),
        })
        .await;
    assert!(matches!(result, Err(SelectionError::UnknownTier(name)) if name == "nonexistent"));
}

#[tokio::test]
async fn concurrent_sticky_selections_converge_on_one_backend() {
    let registry = Registry::new();
    register_backend(&registry, "a", 40.0, -74.0);
    register_backend(&registry, "b", 40.0, -74.0);
    for id in ["a", "b"] {
        push_stats(&registry, id, vec![10.0; 4], 1.0);
        mark_healthy(&registry, id);
    }

    let s = Arc::new(scorer(registry, Arc::new(InMemoryStickyStore::new())));

    let mut handles = Vec::new();
    for i in 0..8 {
        let s = s.clone();
        handles.push(tokio::spawn(async move {
            s.select(SelectionRequest {
                tier_name: "medium".to_string(),
                client_coords: None,
                sticky_id: Some("shared-session".to_string()),
                request_id: format!("req-{i}"),
            })
            .await
            .unwrap()
            .backend_id
        }));
    }

    let mut winners = Vec::new();
    for h in handles {
        winners.push(h.await.unwrap());
    }
    let first = winners[0].clone();
    assert!(winners.iter().all(|w| *w == first), "all concurrent sticky selections must agree on one backend: {winners:?}");
}

#[tokio::test]
async fn haversine_symmetric_and_zero_for_identical_points() {
    use tiered_router::scorer::haversine_km;

    let a = (40.0, -74.0);
    let b = (34.0, -118.0);
    let forward = haversine_km(a, b);
    let backward = haversine_km(b, a);
    assert!((forward - backward).abs() < 1e-6);
    assert!(haversine_km(a, a).abs() < 1e-9);
}
