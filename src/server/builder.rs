// src/server/builder.rs
use crate::server::listener::bind_tcp;
use crate::shutdown::Shutdown;
use anyhow::Result;
use hyper::server::conn::Http;
use hyper::{Body, Request, Response};
use std::net::SocketAddr;
use std::time::Duration;
use tower::Service;

/// Builder pattern so `main.rs` can inject a per-connection handler
/// factory. Generalizes the original single-handler builder: the handler
/// needs each connection's peer address (spec §4.6), so callers hand over
/// a factory rather than one shared `Service`.
pub struct ServerBuilder<F> {
    addr: SocketAddr,
    factory: Option<F>,
    read_header_timeout: Duration,
    shutdown: Shutdown,
    shutdown_timeout: Duration,
}

impl<F, H> ServerBuilder<F>
where
    F: Fn(SocketAddr) -> H + Send + Sync + 'static,
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            factory: None,
            read_header_timeout: Duration::from_secs(5),
            shutdown: Shutdown::new(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    /// Inject a per-connection handler factory (usually builds a
    /// `server::handler::RequestHandler` wrapping `AppState`).
    pub fn with_handler_factory(mut self, factory: F) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Guards against slow-loris clients (spec §6 "Read-header timeout").
    pub fn with_read_header_timeout(mut self, timeout: Duration) -> Self {
        self.read_header_timeout = timeout;
        self
    }

    /// Shares a cancellation signal with the rest of the process and
    /// bounds how long in-flight connections are given to finish once it
    /// fires (spec §5 "graceful shutdown").
    pub fn with_shutdown(mut self, shutdown: Shutdown, timeout: Duration) -> Self {
        self.shutdown = shutdown;
        self.shutdown_timeout = timeout;
        self
    }

    /// Consume the builder, boot the TCP listener, spawn Hyper tasks per
    /// connection, and drain them on shutdown.
    pub async fn serve(self) -> Result<()> {
        let factory = self.factory.expect("handler factory must be set via with_handler_factory()");
        let listener = bind_tcp(self.addr).await?;
        tracing::info!("HTTP server listening on {}", self.addr);

        let mut accept_shutdown = self.shutdown.subscribe();
        let mut connections = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let svc = factory(peer);
                    let mut http = Http::new();
                    http.http1_header_read_timeout(self.read_header_timeout);
                    let mut conn_shutdown = self.shutdown.subscribe();

                    connections.spawn(async move {
                        let conn = http.serve_connection(stream, svc);
                        tokio::pin!(conn);
                        tokio::select! {
                            res = &mut conn => {
                                if let Err(err) = res {
                                    tracing::warn!(%peer, %err, "connection error");
                                }
                            }
                            _ = conn_shutdown.changed() => {
                                if *conn_shutdown.borrow() {
                                    conn.as_mut().graceful_shutdown();
                                    if let Err(err) = conn.await {
                                        tracing::warn!(%peer, %err, "connection error during shutdown");
                                    }
                                }
                            }
                        }
                    });
                }
                _ = accept_shutdown.changed() => {
                    if *accept_shutdown.borrow() {
                        tracing::info!("shutdown signal received, draining in-flight connections");
                        break;
                    }
                }
            }
        }

        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            tracing::warn!("shutdown_timeout elapsed with connections still in flight");
        }

        Ok(())
    }
}
