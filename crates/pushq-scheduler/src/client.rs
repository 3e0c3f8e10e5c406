//! Queue client used by submitters.

use pushq_core::{JobEvent, JobEventKind, JobId, JobKind, JobRecord, SubmitPayload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::error;

use crate::{EventDispatcher, JobTransport, QueueResult};

/// Returned to the submitter once a job is in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
    pub kind: JobKind,
}

/// Submits jobs to the transport and publishes their `enqueued` event.
///
/// Submission returns as soon as the transport has stored the job; it never
/// waits for processing.
#[derive(Clone)]
pub struct QueueClient {
    transport: Arc<dyn JobTransport>,
    events: Arc<EventDispatcher>,
}

impl QueueClient {
    pub fn new(transport: Arc<dyn JobTransport>, events: Arc<EventDispatcher>) -> Self {
        Self { transport, events }
    }

    /// Build a record of `kind` and enqueue it.
    pub async fn submit(
        &self,
        kind: JobKind,
        id: JobId,
        payload: serde_json::Value,
    ) -> QueueResult<JobHandle> {
        self.enqueue(JobRecord::new(id, kind, payload)).await
    }

    /// Enqueue a submit job.
    pub async fn submit_job(&self, id: JobId, payload: &SubmitPayload) -> QueueResult<JobHandle> {
        self.enqueue(JobRecord::submit(id, payload)?).await
    }

    /// Enqueue a diagnostic test job.
    pub async fn submit_test(&self, id: JobId) -> QueueResult<JobHandle> {
        self.enqueue(JobRecord::test(id)).await
    }

    /// Enqueue an already built record.
    ///
    /// Transport errors are logged here and returned; they never panic.
    pub async fn enqueue(&self, record: JobRecord) -> QueueResult<JobHandle> {
        if let Err(e) = self.transport.enqueue(&record).await {
            error!(
                job_id = %record.id,
                transport = self.transport.name(),
                error = %e,
                "The queue threw an error"
            );
            return Err(e);
        }

        let handle = JobHandle {
            id: record.id.clone(),
            kind: record.kind,
        };
        self.events
            .publish(JobEvent::new(record.id, record.kind, JobEventKind::Enqueued))
            .await;
        Ok(handle)
    }

    /// Lifecycle events of all jobs, from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn transport(&self) -> &Arc<dyn JobTransport> {
        &self.transport
    }
}
