// src/server/handler.rs
use super::routes;
use super::state::AppState;
use crate::admission::{self, RateLimiterFront};
use crate::error::{catch_panic, AppError};
use crate::extractor::resolve_client_ip;
use hyper::{Body, Method, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// Routes one connection's requests against shared [`AppState`]. One
/// instance is constructed per accepted connection so it can carry that
/// connection's peer address (spec §4.6 "Client IP ... parsed from the
/// effective remote address of the TCP connection").
#[derive(Clone)]
pub struct RequestHandler {
    state: Arc<AppState>,
    peer_addr: SocketAddr,
}

impl RequestHandler {
    pub fn new(state: Arc<AppState>, peer_addr: SocketAddr) -> Self {
        Self { state, peer_addr }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let state = self.state.clone();
        let peer_addr = self.peer_addr;
        Box::pin(async move {
            if let Some(metrics) = &state.metrics {
                metrics.increment_active_connections();
            }
            let mut resp = match catch_panic(dispatch(state.clone(), req, peer_addr)).await {
                Ok(resp) => resp,
                Err(e) => e.into_response(),
            };
            admission::apply_security_headers(&mut resp);
            if let Some(metrics) = &state.metrics {
                metrics.decrement_active_connections();
            }
            Ok(resp)
        })
    }
}

/// Admission checks (spec §6) plus endpoint dispatch by method/path.
async fn dispatch(
    state: Arc<AppState>,
    req: Request<Body>,
    peer_addr: SocketAddr,
) -> Result<Response<Body>, AppError> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    if path == "/health" && method == Method::GET {
        return routes::health(&state).await;
    }

    let client_ip = resolve_client_ip(
        req.headers(),
        non_empty(&state.config.proxy.trusted_proxy_header),
        peer_addr,
    );

    admission::check_auth(&state.config.auth, req.headers())?;
    check_rate_limit(&state.rate_limiter, client_ip)?;
    admission::check_content_length(req.headers(), state.config.server.max_body_bytes)?;

    match (method.clone(), path.as_str()) {
        (Method::POST, "/register") => routes::register(&state, req).await,
        (Method::POST, "/stats") => routes::stats(&state, req).await,
        (Method::POST, "/route") => routes::route(&state, req).await,
        (Method::GET, "/clients") => routes::clients(&state).await,
        _ => {
            if let Some(id) = admin_remove_backend_id(&method, &path) {
                routes::remove_backend(&state, id).await
            } else if is_proxy_path(&state, &path) {
                routes::proxy(&state, req, peer_addr).await
            } else {
                Err(AppError::NotFound)
            }
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

fn check_rate_limit(limiter: &RateLimiterFront, client_ip: std::net::IpAddr) -> Result<(), AppError> {
    limiter.check(client_ip)
}

fn admin_remove_backend_id<'a>(method: &Method, path: &'a str) -> Option<&'a str> {
    if method != Method::POST && method != Method::DELETE {
        return None;
    }
    path.strip_prefix("/admin/backends/")
        .and_then(|rest| rest.strip_suffix("/remove"))
        .filter(|id| !id.is_empty())
}

fn is_proxy_path(state: &AppState, path: &str) -> bool {
    state
        .config
        .proxy
        .prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()))
}
