//! Long-running worker command.

use anyhow::{Context, Result};
use pushq_config::QueueBackend;
use pushq_services::Runtime;
use std::path::Path;
use tracing::{info, warn};

/// Run the worker pool until Ctrl-C, then let in-flight jobs finish.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;
    if config.queue.backend == QueueBackend::Memory {
        warn!("No queue URL configured; this worker only sees jobs submitted in-process");
    }

    let runtime = Runtime::connect(config)
        .await
        .context("Failed to connect to the queue")?;
    let pool = runtime.worker_pool()?.spawn("worker");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received; finishing in-flight jobs");

    pool.shutdown().await;
    runtime.close().await;
    Ok(())
}
