//! Coordinator HTTP surface.
//!
//! This crate provides:
//! - The signed worker RPC endpoint
//! - Health and roster endpoints
//! - Prometheus metrics
//! - The `fleetcron` node binary

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
