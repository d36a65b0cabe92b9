//! The `fleetcron` node: scheduler loop plus the HTTP surface.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fleetcron_jobs::{FleetConfig, Node};
use fleetcron_server::{create_router, metrics, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Required for rustls 0.23+
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    init_tracing()?;

    let fleet = FleetConfig::from_env().context("Invalid node configuration")?;
    let server = ServerConfig::from_env();
    info!(
        role = %fleet.node.role,
        advertised = %fleet.node.advertised_url,
        bind = %server.bind_address(),
        "Starting fleetcron"
    );

    let node = Node::build(fleet).await.context("Failed to assemble node")?;

    let metrics_handle = if server.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("Failed to install metrics recorder")?)
    } else {
        None
    };

    let scheduler = Arc::new(node.scheduler());
    let ticking = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run().await }
    });

    let app = create_router(AppState::for_node(server.clone(), &node), metrics_handle);
    let listener = tokio::net::TcpListener::bind(server.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", server.bind_address()))?;
    info!("Listening on {}", server.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler.shutdown();
    let _ = ticking.await;
    info!("Shutdown complete");
    Ok(())
}

/// Compact colored output for development, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("fleetcron=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the process is killed.
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
