//! Request correlation and access logging.

use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request, Response};
use axum::middleware::Next;
use tracing::{debug, info, Span};
use uuid::Uuid;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Paths polled by probes and scrapers; logged at debug only.
const QUIET_PATHS: [&str; 3] = ["/health", "/healthz", "/metrics"];

/// Reuse the caller's request id or mint one, and echo it on the response.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response<Body> {
    let id = match request.headers().get(&REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    };

    Span::current().record("request_id", id.as_str());
    request.extensions_mut().insert(id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}

pub async fn request_logging(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if QUIET_PATHS.contains(&path.as_str()) {
        debug!(%method, path = %path, status, elapsed_ms, "Probe served");
    } else {
        info!(%method, path = %path, status, elapsed_ms, "Request served");
    }
    response
}
