//! Workers that claim jobs from the transport and run them.

use pushq_core::{Error, JobEvent, JobEventKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{ClaimedJob, EventDispatcher, JobOutcome, JobTransport, PipelineExecutor};

/// Back-off after the transport reports an error.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// A worker that claims and executes jobs, one at a time.
pub struct Worker {
    id: String,
    transport: Arc<dyn JobTransport>,
    executor: Arc<PipelineExecutor>,
    events: Arc<EventDispatcher>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        transport: Arc<dyn JobTransport>,
        executor: Arc<PipelineExecutor>,
        events: Arc<EventDispatcher>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            transport,
            executor,
            events,
            poll_interval,
        }
    }

    /// Run the worker loop until `shutdown` flips to true.
    ///
    /// A job in progress is always finished before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.id, transport = self.transport.name(), "Starting worker");

        while !*shutdown.borrow() {
            match self.transport.claim(&self.id).await {
                Ok(Some(job)) => {
                    self.handle(job).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = self.transport.idle(self.poll_interval) => {}
                        changed = shutdown.changed() => if changed.is_err() { break },
                    }
                }
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Failed to claim job");
                    tokio::select! {
                        _ = sleep(ERROR_BACKOFF) => {}
                        changed = shutdown.changed() => if changed.is_err() { break },
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Process one claimed job and report its outcome to the transport.
    pub async fn handle(&self, claimed: ClaimedJob) -> JobOutcome {
        let job = claimed.record;
        let job_id = job.id.clone();
        let kind = job.kind;

        if claimed.attempt > 1 {
            warn!(job_id = %job_id, attempt = claimed.attempt, "Job redelivered; reprocessing from the first stage");
        }
        self.events
            .publish(JobEvent::new(job_id.clone(), kind, JobEventKind::Started))
            .await;

        // A panicking stage must not take the worker down with it.
        let executor = self.executor.clone();
        let outcome = match tokio::spawn(async move { executor.process(job).await }).await {
            Ok(run) => run.outcome,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Job task aborted");
                JobOutcome::Failed {
                    stage: "none",
                    error: Error::Internal(format!("job task aborted: {e}")),
                }
            }
        };

        let reported = match &outcome {
            JobOutcome::Completed { message } => self.transport.complete(&job_id, message).await,
            JobOutcome::Failed { error, .. } => {
                self.transport.fail(&job_id, &error.to_string()).await
            }
        };
        if let Err(e) = reported {
            warn!(job_id = %job_id, error = %e, "Failed to record job outcome in the queue");
        }

        self.events
            .publish(JobEvent::new(job_id, kind, outcome.event_kind()))
            .await;
        outcome
    }
}

/// A set of workers sharing one transport and executor.
pub struct WorkerPool {
    concurrency: usize,
    transport: Arc<dyn JobTransport>,
    executor: Arc<PipelineExecutor>,
    events: Arc<EventDispatcher>,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

/// Handle to a running pool.
pub struct WorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl WorkerPool {
    pub fn new(
        concurrency: usize,
        transport: Arc<dyn JobTransport>,
        executor: Arc<PipelineExecutor>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            concurrency: concurrency.max(1),
            transport,
            executor,
            events,
            poll_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(30 * 60),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    /// Spawn the workers plus a task that hands stale claims back to the queue.
    pub fn spawn(self, name_prefix: &str) -> WorkerPoolHandle {
        let (shutdown, rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        for slot in 0..self.concurrency {
            let worker = Worker::new(
                format!("{name_prefix}-{slot}"),
                self.transport.clone(),
                self.executor.clone(),
                self.events.clone(),
                self.poll_interval,
            );
            let rx = rx.clone();
            tasks.spawn(async move { worker.run(rx).await });
        }

        let transport = self.transport.clone();
        let visibility_timeout = self.visibility_timeout;
        let mut reaper_rx = rx;
        tasks.spawn(async move {
            let period = (visibility_timeout / 2).max(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = sleep(period) => {}
                    _ = reaper_rx.changed() => break,
                }
                match transport.requeue_stale(visibility_timeout).await {
                    Ok(0) => {}
                    Ok(n) => warn!(released = n, "Handed stale job claims back to the queue"),
                    Err(e) => warn!(error = %e, "Failed to requeue stale jobs"),
                }
            }
        });

        info!(workers = self.concurrency, "Worker pool started");
        WorkerPoolHandle { shutdown, tasks }
    }
}

impl WorkerPoolHandle {
    /// Stop claiming new jobs and wait for in-flight jobs to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}
