//! Metrics HTTP Endpoint
//!
//! Serves the block counters on a separate port:
//! - `/metrics` in Prometheus text exposition format
//! - `/stats` as a JSON snapshot
//! - `/health` as a liveness probe

use crate::metrics::{BlockMetrics, MetricsSnapshot};
use http::header::{HeaderValue, CONTENT_TYPE};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Metrics endpoint server
pub struct MetricsEndpoint {
    metrics: Arc<BlockMetrics>,
    addr: SocketAddr,
}

impl MetricsEndpoint {
    /// Create a new metrics endpoint
    ///
    /// # Arguments
    /// * `metrics` - Shared metrics collector
    /// * `addr` - Address to bind the HTTP server to
    pub fn new(metrics: Arc<BlockMetrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Run the endpoint until the process exits
    pub async fn start(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics endpoint listening on http://{}", self.addr);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept metrics connection: {}", e);
                    continue;
                }
            };
            let io = TokioIo::new(stream);
            let metrics = Arc::clone(&self.metrics);

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let metrics = Arc::clone(&metrics);
                    async move { Ok::<_, Infallible>(route(req.uri().path(), &metrics)) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection from {}: {:?}", peer, err);
                }
            });
        }
    }
}

/// Dispatch a metrics endpoint path
fn route(path: &str, metrics: &BlockMetrics) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => text_response(
            StatusCode::OK,
            PROMETHEUS_CONTENT_TYPE,
            format_prometheus_metrics(&metrics.get_stats()),
        ),
        "/stats" => stats_response(&metrics.get_stats()),
        "/health" => text_response(
            StatusCode::OK,
            "application/json",
            r#"{"status":"healthy"}"#.to_string(),
        ),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found".to_string()),
    }
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: String,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn stats_response(snapshot: &MetricsSnapshot) -> Response<Full<Bytes>> {
    match serde_json::to_string(snapshot) {
        Ok(body) => text_response(StatusCode::OK, "application/json", body),
        Err(e) => {
            error!("Failed to serialize metrics snapshot: {}", e);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                "failed to serialize metrics".to_string(),
            )
        }
    }
}

/// Append one metric with its HELP and TYPE lines
fn write_metric(out: &mut String, name: &str, kind: &str, help: &str, value: &str) {
    // Writing into a String cannot fail
    let _ = writeln!(out, "# HELP block_slice_{} {}", name, help);
    let _ = writeln!(out, "# TYPE block_slice_{} {}", name, kind);
    let _ = writeln!(out, "block_slice_{} {}\n", name, value);
}

/// Format metrics in Prometheus exposition format
fn format_prometheus_metrics(s: &MetricsSnapshot) -> String {
    let counters = [
        ("requests_total", "Total number of requests processed", s.total_requests),
        ("full_requests_total", "Requests answered with 200 OK", s.full_requests),
        (
            "partial_requests_total",
            "Requests answered with 206 Partial Content",
            s.partial_requests,
        ),
        ("failed_requests_total", "Requests answered with an error", s.failed_requests),
        ("cache_hits_total", "Blocks served from cache", s.cache_hits),
        ("cache_misses_total", "Blocks not found in cache", s.cache_misses),
        ("cache_errors_total", "Failed cache reads and writes", s.cache_errors),
        ("origin_fetches_total", "Block range requests sent to origin", s.origin_fetches),
        ("origin_failures_total", "Failed block range requests", s.origin_failures),
        ("bytes_from_origin_total", "Total bytes received from origin", s.bytes_from_origin),
        ("bytes_from_cache_total", "Total bytes read from cache", s.bytes_from_cache),
        ("bytes_to_client_total", "Total body bytes sent to clients", s.bytes_to_client),
    ];
    let gauges = [
        ("cache_hit_rate", "Cache hit rate percentage", s.cache_hit_rate()),
        ("origin_failure_rate", "Origin failure rate percentage", s.origin_failure_rate()),
        (
            "request_duration_ms_avg",
            "Average request duration in milliseconds",
            s.avg_request_duration_ms(),
        ),
        (
            "fetch_duration_ms_avg",
            "Average block fetch time per served request in milliseconds",
            s.avg_fetch_duration_ms(),
        ),
    ];

    let mut out = String::new();
    for (name, help, value) in counters {
        write_metric(&mut out, name, "counter", help, &value.to_string());
    }
    for (name, help, value) in gauges {
        write_metric(&mut out, name, "gauge", help, &format!("{:.2}", value));
    }
    out
}
