//! Job submission commands.

use anyhow::{Context, Result, anyhow, bail};
use pushq_config::QueueBackend;
use pushq_core::{JobEventKind, JobId, SubmitPayload};
use pushq_scheduler::JobHandle;
use pushq_services::Runtime;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

pub struct SubmitArgs {
    pub source_url: String,
    pub repository: String,
    pub owner_email: String,
    pub id: Option<String>,
    pub build: Vec<String>,
}

/// Parse `key=value` pairs; values that parse as JSON keep their type.
fn parse_build(pairs: &[String]) -> Result<HashMap<String, Value>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("build parameter {pair:?} is not key=value"))?;
            if key.is_empty() {
                bail!("build parameter {pair:?} has an empty key");
            }
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
            Ok((key.to_string(), value))
        })
        .collect()
}

pub async fn submit(config_path: Option<&Path>, args: SubmitArgs) -> Result<()> {
    let id = match args.id {
        Some(raw) => JobId::parse(raw)?,
        None => JobId::generate(),
    };
    let payload = SubmitPayload {
        source_url: args.source_url,
        repository: args.repository,
        owner_email: args.owner_email,
        build: parse_build(&args.build)?,
    };

    let runtime = connect(config_path).await?;
    let handle = runtime.client.submit_job(id, &payload).await?;
    finish(&runtime, handle).await
}

pub async fn test(config_path: Option<&Path>) -> Result<()> {
    let runtime = connect(config_path).await?;
    let handle = runtime.client.submit_test(JobId::generate()).await?;
    finish(&runtime, handle).await
}

async fn connect(config_path: Option<&Path>) -> Result<Runtime> {
    let config = super::load_config(config_path)?;
    Runtime::connect(config)
        .await
        .context("Failed to connect to the queue")
}

/// Report the enqueued job. A memory queue lives only as long as this
/// process, so the job is processed here before returning.
async fn finish(runtime: &Runtime, handle: JobHandle) -> Result<()> {
    println!("Enqueued {} job {}", handle.kind, handle.id);

    if runtime.config.queue.backend != QueueBackend::Memory {
        runtime.close().await;
        return Ok(());
    }

    let mut events = runtime.client.subscribe();
    let pool = runtime.worker_pool()?.spawn("cli");
    let outcome = loop {
        let event = events.recv().await.context("Event stream closed")?;
        if event.job_id == handle.id && event.kind.is_terminal() {
            break event.kind;
        }
    };
    pool.shutdown().await;
    runtime.close().await;

    match outcome {
        JobEventKind::Completed { message } => {
            println!("Job {} completed: {}", handle.id, message);
            Ok(())
        }
        JobEventKind::Failed { error } => bail!("job {} failed: {}", handle.id, error),
        other => bail!("job {} ended with unexpected event {}", handle.id, other.name()),
    }
}
