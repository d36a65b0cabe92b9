//! Prometheus metrics for the coordinator endpoint.
//!
//! The recorder installed here also collects the job metrics recorded by the
//! scheduler.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Install the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "fleetcron_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "fleetcron_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "fleetcron_http_requests_in_flight";

    // RPC metrics
    pub const RPC_REQUESTS_TOTAL: &str = "fleetcron_rpc_requests_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path).to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record one worker RPC call by command and response status.
pub fn record_rpc_request(command: &str, status: u16) {
    let labels = [("command", command.to_string()), ("status", status.to_string())];
    counter!(names::RPC_REQUESTS_TOTAL, &labels).increment(1);
}

/// Known routes keep their path label; anything else is folded into one.
fn sanitize_path(path: &str) -> &str {
    match path {
        "/rpc" | "/health" | "/healthz" | "/roster" | "/metrics" => path,
        _ => "other",
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    record_http_request(&method, &path, status, start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/rpc"), "/rpc");
        assert_eq!(sanitize_path("/wp-admin/setup.php"), "other");
    }
}
