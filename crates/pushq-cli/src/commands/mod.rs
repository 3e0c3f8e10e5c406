//! CLI command implementations.

pub mod submit;
pub mod worker;

use anyhow::{Context, Result, bail};
use pushq_config::{QueueBackend, SystemConfig, parse_system_config};
use std::path::Path;

/// Load the configuration file (if any) plus environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<SystemConfig> {
    SystemConfig::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load config file: {}", path.display()),
        None => "Failed to load configuration from the environment".to_string(),
    })
}

pub fn validate(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    match parse_system_config(&content) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  queue:       {}", config.queue.redacted());
            println!("  concurrency: {}", config.worker.concurrency);
            println!("  job timeout: {}s", config.worker.job_timeout.as_secs());
            println!("  work root:   {}", config.work_root.display());
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

pub async fn migrate(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    if config.queue.backend != QueueBackend::Postgres {
        bail!("migrations need a PostgreSQL queue; set QUEUE_URL or the queue node");
    }

    let pool = pushq_db::create_pool(&config.queue, 1)
        .await
        .context("Failed to connect to database")?;
    pushq_db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    println!("Migrations applied to {}", config.queue.redacted());
    Ok(())
}
