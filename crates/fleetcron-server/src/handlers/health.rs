//! Liveness and roster handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct RosterEntry {
    pub position: usize,
    pub machine_id: String,
}

/// The node's view of the fleet.
#[derive(Debug, Serialize)]
pub struct RosterResponse {
    pub machine_id: String,
    pub role: String,
    pub single_node: bool,
    pub workers: Vec<RosterEntry>,
    pub jobs: Vec<String>,
}

/// Ordered worker roster, as used by the partition function.
pub async fn roster(State(state): State<AppState>) -> Json<RosterResponse> {
    let workers = state
        .roster
        .members()
        .iter()
        .enumerate()
        .map(|(position, id)| RosterEntry {
            position,
            machine_id: id.to_string(),
        })
        .collect();

    Json(RosterResponse {
        machine_id: state.machine_id.to_string(),
        role: state.role.as_str().to_string(),
        single_node: state.roster.is_empty(),
        workers,
        jobs: state.registry.names(),
    })
}
