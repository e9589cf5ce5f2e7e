//! Prometheus metrics for RelayStore.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides an axum middleware for HTTP RED
//! metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "relaystore_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "relaystore_http_request_duration_seconds";

/// Finished transfers (counter). Labels: operation, status.
pub const TRANSFERS_TOTAL: &str = "relaystore_transfers_total";

/// Total plaintext bytes accepted by uploads (counter).
pub const BYTES_RECEIVED_TOTAL: &str = "relaystore_bytes_received_total";

/// Total bytes written to download bodies (counter).
pub const BYTES_SENT_TOTAL: &str = "relaystore_bytes_sent_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent, so tests may
/// call it repeatedly.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(TRANSFERS_TOTAL, "Finished transfers by operation and status");
    describe_counter!(BYTES_RECEIVED_TOTAL, "Total plaintext bytes received by uploads");
    describe_counter!(BYTES_SENT_TOTAL, "Total bytes sent in download bodies");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Streaming bodies are still in flight when this returns, so the
/// duration covers time to first byte.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());
    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize a request path to its route template so bucket and object
/// names do not become label values.
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.trim_matches('/').splitn(4, '/').collect();
    match segments.as_slice() {
        [""] => "/".to_string(),
        ["health"] | ["metrics"] => path.to_string(),
        ["buckets"] => "/buckets".to_string(),
        ["buckets", _] => "/buckets/{bucket}".to_string(),
        ["objects", _] => "/objects/{bucket}".to_string(),
        ["objects", _, ..] => "/objects/{bucket}/{name}".to_string(),
        ["replicator", "objects", _, _, ..] => "/replicator/objects/{bucket}/{name}".to_string(),
        _ => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics`: Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics are disabled").into_response(),
    }
}

// -- Tests --------------------------------------------------------------------
