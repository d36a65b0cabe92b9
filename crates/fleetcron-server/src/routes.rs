//! HTTP routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use fleetcron_rpc::RPC_PATH;

use crate::handlers::{health, roster, rpc};
use crate::metrics::metrics_middleware;
use crate::middleware::{request_id, request_logging};
use crate::state::AppState;

/// Create the node router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let rpc_routes = Router::new()
        .route(RPC_PATH, post(rpc))
        // Segment payloads exceed axum's default limit; RequestBodyLimitLayer governs instead.
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size));

    let node_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/roster", get(roster));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(rpc_routes)
        .merge(node_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
