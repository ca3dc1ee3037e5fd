//! Prometheus Metrics HTTP Server
//!
//! Serves `/metrics` for scraping and `/health` for liveness probes on a
//! separate port from the API.
//!
//! # Example
//!
//! ```no_run
//! use stream_ingestr::metrics::server::MetricsServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = MetricsServer::new("127.0.0.1:9090");
//!     let addr = server.start().await?;
//!     println!("Metrics server listening on {}", addr);
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::config::MetricsConfig;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Metrics server error
#[derive(Debug, thiserror::Error)]
pub enum MetricsServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Prometheus metrics HTTP server
pub struct MetricsServer {
    address: String,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl MetricsServer {
    /// Create a new metrics server for `address` (e.g. "0.0.0.0:9090")
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Server listening on all interfaces at the configured port
    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::new(format!("0.0.0.0:{}", config.port))
    }

    /// Start the metrics server
    ///
    /// Returns the actual bound address (useful when using port 0)
    pub async fn start(&mut self) -> Result<SocketAddr, MetricsServerError> {
        let listener = TcpListener::bind(&self.address).await?;
        let addr = listener.local_addr()?;

        let shutdown = self.shutdown.clone();
        let connections = self.tracker.clone();
        self.tracker.spawn(async move {
            run_server(listener, shutdown, connections).await;
        });

        tracing::info!(address = %addr, "Metrics server listening");
        Ok(addr)
    }

    /// Shutdown the metrics server
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Accept loop
async fn run_server(listener: TcpListener, shutdown: CancellationToken, connections: TaskTracker) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = listener.accept() => {
                let Ok((stream, _)) = result else { continue };
                let io = TokioIo::new(stream);
                let shutdown = shutdown.clone();
                connections.spawn(async move {
                    let conn = http1::Builder::new().serve_connection(io, service_fn(handle_request));
                    tokio::pin!(conn);
                    tokio::select! {
                        _ = conn.as_mut() => {}
                        _ = shutdown.cancelled() => {
                            conn.as_mut().graceful_shutdown();
                            let _ = conn.as_mut().await;
                        }
                    }
                });
            }
        }
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => metrics_handler(),
        (&Method::GET, "/health") => health_handler(),
        _ => not_found_handler(),
    };
    Ok(response)
}

fn response(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Handle /metrics endpoint
fn metrics_handler() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            "Failed to encode metrics",
        );
    }

    response(StatusCode::OK, encoder.format_type(), buffer)
}

/// Handle /health endpoint
fn health_handler() -> Response<Full<Bytes>> {
    response(StatusCode::OK, "application/json", r#"{"status":"ok"}"#)
}

/// Handle unknown endpoints
fn not_found_handler() -> Response<Full<Bytes>> {
    response(StatusCode::NOT_FOUND, "text/plain", "Not Found")
}
