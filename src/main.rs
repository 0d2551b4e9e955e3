// src/main.rs
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use tiered_router::config::{self, Config};
use tiered_router::db;
use tiered_router::geo::{Geolocate, NullGeolocate};
use tiered_router::health::Prober;
use tiered_router::ledger::PendingLedger;
use tiered_router::metrics::MetricsRegistry;
use tiered_router::proxy::Proxy;
use tiered_router::registry::Registry;
use tiered_router::scorer::Scorer;
use tiered_router::server::handler::RequestHandler;
use tiered_router::server::{AppState, ServerBuilder};
use tiered_router::shutdown::Shutdown;
use tiered_router::sticky::{SqlStickyStore, StickyStore};
use tiered_router::tier::TierCatalog;
use tiered_router::admission::RateLimiterFront;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tiered_router=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    info!(path = %config_path, "loading configuration");
    let config = config::load_config(&config_path).await?;

    let metrics_registry = MetricsRegistry::new()?;
    let metrics = metrics_registry.collector();

    let pool = db::connect(&config.database.dsn)
        .await
        .context("failed to set up persistence layer")?;
    let clients_writer = tiered_router::db::ClientsWriter::new(pool.clone());
    let stats_writer = tiered_router::db::StatsHistoryWriter::new(pool.clone());

    let registry = Registry::new();
    let ledger = PendingLedger::new(config.pending.ttl());
    let sticky: Arc<dyn StickyStore> = Arc::new(SqlStickyStore::new(pool.clone()));
    let tiers = Arc::new(
        TierCatalog::new(config.tiers.catalog.clone(), config.tiers.default_tier.clone())
            .map_err(|e| anyhow::anyhow!(e))?,
    );

    let scorer = Scorer::new(
        registry.clone(),
        ledger.clone(),
        sticky.clone(),
        tiers.clone(),
        config.scoring.clone(),
        config.registry.stale_window(),
        config.sticky.affinity_enabled,
        config.pending.ttl(),
    )
    .with_metrics(metrics.clone());

    let geolocate: Arc<dyn Geolocate> = Arc::new(NullGeolocate);
    let sticky_header = (!config.sticky.header.is_empty()).then(|| config.sticky.header.clone());
    let proxy = Proxy::new(
        registry.clone(),
        scorer.clone(),
        geolocate.clone(),
        config.extractor.clone(),
        config.proxy.clone(),
        sticky_header,
        tiers.clone(),
        Duration::from_millis(config.server.request_timeout_ms),
        Some(metrics.clone()),
    );

    let rate_limiter = RateLimiterFront::new(&config.rate_limit);

    let state = Arc::new(AppState {
        config: config.clone(),
        registry: registry.clone(),
        ledger: ledger.clone(),
        sticky: sticky.clone(),
        scorer,
        proxy,
        tiers,
        rate_limiter,
        metrics: Some(metrics.clone()),
        clients_writer: Some(clients_writer),
        stats_writer: Some(stats_writer),
        geolocate,
        started_at: chrono::Utc::now(),
    });

    let shutdown = Shutdown::new();

    let prober = Arc::new(Prober::new(
        config.health_check.clone(),
        registry.clone(),
        sticky.clone(),
        shutdown.clone(),
        Some(metrics.clone()),
    ));
    tokio::spawn(prober.run());

    tokio::spawn(sweep_loop(
        ledger.clone(),
        Duration::from_secs(config.pending.sweep_interval_seconds),
        shutdown.clone(),
    ));

    tokio::spawn(db::retention_sweep_loop(
        pool.clone(),
        Duration::from_secs(config.database.stats_retention_hours * 3600),
        Duration::from_secs(config.database.retention_sweep_interval_seconds),
        shutdown.clone(),
    ));

    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, metrics_registry, config.metrics.path.clone());
    }

    let addr: SocketAddr = config.server.bind_addr.parse()?;
    info!(%addr, "starting router");

    let handler_state = state.clone();
    let handler_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        handler_shutdown.trigger();
    });

    ServerBuilder::new(addr)
        .with_handler_factory(move |peer| RequestHandler::new(handler_state.clone(), peer))
        .with_read_header_timeout(Duration::from_millis(config.server.read_header_timeout_ms))
        .with_shutdown(shutdown, Duration::from_secs(config.server.shutdown_timeout_seconds))
        .serve()
        .await
}

/// Periodically sweeps expired pending allocations (spec §4.2 "sweep" /
/// §5 "pending ledger sweeper").
async fn sweep_loop(ledger: PendingLedger, interval: Duration, shutdown: Shutdown) {
    let mut ticker = tokio::time::interval(interval);
    let mut shutdown_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                ledger.sweep(std::time::Instant::now());
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

fn start_metrics_server(addr: SocketAddr, registry: MetricsRegistry, path: String) {
    use hyper::{Body, Request, Response, Server, StatusCode};
    use std::convert::Infallible;

    let registry = Arc::new(registry);
    let path = Arc::new(path);

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = path.clone();
        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();
                async move {
                    if req.uri().path() == path.as_str() {
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(StatusCode::OK)
                                .header("Content-Type", "text/plain; version=0.0.4")
                                .body(Body::from(registry.gather()))
                                .unwrap(),
                        )
                    } else {
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(StatusCode::NOT_FOUND)
                                .body(Body::from("not found"))
                                .unwrap(),
                        )
                    }
                }
            }))
        }
    });

    info!(%addr, "metrics server listening");
    tokio::spawn(async move {
        if let Err(e) = Server::bind(&addr).serve(make_service).await {
            tracing::error!(error = %e, "metrics server error");
        }
    });
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
