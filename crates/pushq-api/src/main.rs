//! pushq API Server

use anyhow::Context;
use pushq_api::{AppState, routes};
use pushq_config::{QueueBackend, SystemConfig};
use pushq_services::Runtime;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("PUSHQ_CONFIG").ok().map(PathBuf::from);
    let config = SystemConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    // A memory queue is only reachable from this process, so it always gets workers.
    let embedded_workers = config.queue.backend == QueueBackend::Memory
        || std::env::var("PUSHQ_EMBEDDED_WORKERS").is_ok_and(|v| v == "1" || v == "true");

    let runtime = Runtime::connect(config)
        .await
        .context("Failed to connect to the queue")?;

    let workers = if embedded_workers {
        Some(runtime.worker_pool()?.spawn("server"))
    } else {
        None
    };

    let app = routes::router(AppState::from_runtime(&runtime))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    if let Some(workers) = workers {
        workers.shutdown().await;
    }
    runtime.close().await;

    Ok(())
}
