//! Lifecycle event wiring.
//!
//! Every event is logged, mirrored to the configured audit sinks and
//! broadcast to in-process subscribers.

use async_trait::async_trait;
use pushq_core::stage::EventSink;
use pushq_core::{JobEvent, JobEventKind, JobKind};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const DEFAULT_CAPACITY: usize = 256;

/// Fans lifecycle events out to logs, sinks and subscribers.
pub struct EventDispatcher {
    tx: broadcast::Sender<JobEvent>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self {
            tx,
            sinks: Vec::new(),
        }
    }

    /// Add a sink that receives a copy of every event.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub async fn publish(&self, event: JobEvent) {
        log_event(&event);

        for sink in &self.sinks {
            if let Err(e) = sink.record(&event).await {
                warn!(job_id = %event.job_id, error = %e, "Failed to mirror job event to audit sink");
            }
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

fn log_event(event: &JobEvent) {
    let label = match event.job_kind {
        JobKind::Submit => format!("job-{}", event.job_id),
        JobKind::Test => "test".to_string(),
    };
    match &event.kind {
        JobEventKind::Failed { error } => {
            error!(job_id = %event.job_id, job_kind = %event.job_kind, %error, "[{}] {}", label, event.describe());
        }
        JobEventKind::RollbackFailed { error } => {
            error!(job_id = %event.job_id, job_kind = %event.job_kind, %error, "[{}] {}", label, event.describe());
        }
        _ => {
            info!(job_id = %event.job_id, job_kind = %event.job_kind, "[{}] {}", label, event.describe());
        }
    }
}

/// Audit sink that writes events to the `pushq::audit` log target.
///
/// Point a log shipper at this target to forward the audit trail.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn record(&self, event: &JobEvent) -> pushq_core::Result<()> {
        info!(
            target: "pushq::audit",
            job_id = %event.job_id,
            job_kind = %event.job_kind,
            event = event.kind.name(),
            at = %event.at.to_rfc3339(),
            "[queue] {}",
            event.describe()
        );
        Ok(())
    }
}
