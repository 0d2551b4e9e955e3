// demos/test_backend.rs
// A fake compute backend for manually exercising the router: registers
// itself, reports synthetic per-core CPU/memory/disk stats on a timer, and
// serves /health plus a couple of inference-shaped endpoints. Not part of
// the crate's build graph; run with `rustc` against a checkout with the
// dependencies on the path, or copy into a scratch binary crate.
//
// Usage: test_backend <listen_port> [router_addr] [backend_id]

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Clone)]
struct BackendState {
    port: u16,
    request_count: Arc<AtomicU64>,
    healthy: Arc<AtomicBool>,
}

async fn handle_request(req: Request<Body>, state: BackendState) -> Result<Response<Body>, Infallible> {
    let count = state.request_count.fetch_add(1, Ordering::SeqCst) + 1;
    let path = req.uri().path().to_string();

    if path == "/health" {
        return Ok(if state.healthy.load(Ordering::SeqCst) {
            Response::new(Body::from("OK"))
        } else {
            Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .body(Body::from("unhealthy"))
                .unwrap()
        });
    }

    sleep(Duration::from_millis(50)).await;

    let body = format!(
        r#"{{"backend_port": {}, "request_count": {}, "path": "{}"}}"#,
        state.port, count, path
    );
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("X-Backend-Port", state.port.to_string())
        .body(Body::from(body))
        .unwrap())
}

/// Publishes a synthetic (but time-varying) `/stats` sample to the router
/// so selection scoring has something real to chew on, mirroring the
/// per-core-CPU / memory / disk shape `registry::StatsRequest` expects.
async fn report_stats_loop(router_addr: String, backend_id: String) {
    let client = reqwest::Client::new();
    let mut tick: u64 = 0;
    loop {
        tick += 1;
        let wobble = (tick % 10) as f64 * 3.0;
        let payload = serde_json::json!({
            "id": backend_id,
            "cpu_core_usage_pct": [20.0 + wobble, 25.0 + wobble, 18.0 + wobble, 30.0 + wobble],
            "memory_used_gb": 4.0 + (wobble / 10.0),
            "memory_total_gb": 16.0,
            "disk_used_gb": 50.0,
            "disk_total_gb": 200.0,
            "gpus": [],
        });
        if let Err(e) = client
            .post(format!("http://{router_addr}/stats"))
            .json(&payload)
            .send()
            .await
        {
            eprintln!("[{backend_id}] failed to publish stats: {e}");
        }
        sleep(Duration::from_secs(5)).await;
    }
}

async fn register_with_router(router_addr: &str, backend_id: &str, port: u16) {
    let client = reqwest::Client::new();
    let payload = serde_json::json!({
        "id": backend_id,
        "hostname": format!("test-backend-{port}"),
        "address": format!("127.0.0.1:{port}"),
        "latitude": 37.7749,
        "longitude": -122.4194,
        "capacity": {
            "vcpu": 4,
            "memory_gb": 16.0,
            "storage_gb": 200.0,
            "gpu_count": 0,
            "gpu_memory_gb": 0.0,
            "gpu_models": []
        },
        "endpoints": [{
            "url": format!("http://127.0.0.1:{port}"),
            "path_prefixes": ["/"]
        }]
    });
    match client.post(format!("http://{router_addr}/register")).json(&payload).send().await {
        Ok(resp) => println!("registered {backend_id} with router: {}", resp.status()),
        Err(e) => eprintln!("failed to register {backend_id} with router: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let port: u16 = args.next().and_then(|s| s.parse().ok()).unwrap_or(8001);
    let router_addr = args.next().unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let backend_id = args.next().unwrap_or_else(|| format!("test-backend-{port}"));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let state = BackendState {
        port,
        request_count: Arc::new(AtomicU64::new(0)),
        healthy: Arc::new(AtomicBool::new(true)),
    };

    register_with_router(&router_addr, &backend_id, port).await;
    tokio::spawn(report_stats_loop(router_addr, backend_id));

    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle_request(req, state.clone()))) }
    });

    let server = Server::bind(&addr).serve(make_svc);
    println!("test backend listening on http://{addr}");

    if let Err(e) = server.await {
        eprintln!("server error: {e}");
    }
    Ok(())
}
