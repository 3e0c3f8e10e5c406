//! Process wiring shared by the server and the CLI.

use pushq_config::SystemConfig;
use pushq_core::stage::Notifier;
use pushq_db::{EventRepo, PgEventRepo};
use pushq_scheduler::{
    CleanupSweeper, EventDispatcher, JobTransport, PipelineExecutor, QueueClient, QueueError,
    SubmitCollaborators, TracingEventSink, WorkerPool,
};
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::{GitPublisher, HttpArchiveSource, HttpMailer, LogMailer, MailError, PropertyWriter};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("mail configuration error: {0}")]
    Mail(#[from] MailError),
}

/// Build the production collaborators of the submit pipeline.
pub fn submit_collaborators(config: &SystemConfig) -> Result<SubmitCollaborators, MailError> {
    let git = Arc::new(GitPublisher::from_settings(config.github.clone()));
    let notifier: Arc<dyn Notifier> = match HttpMailer::from_settings(&config.mail)? {
        Some(mailer) => Arc::new(mailer),
        None => {
            info!("No mail endpoint configured; notifications are logged only");
            Arc::new(LogMailer::default())
        }
    };

    Ok(SubmitCollaborators {
        archive: Arc::new(HttpArchiveSource::new(&config.work_root)),
        metadata: Arc::new(PropertyWriter::new()),
        publisher: git.clone(),
        notifier,
        rollback: git,
    })
}

/// A connected transport plus everything needed to enqueue and run jobs.
pub struct Runtime {
    pub config: SystemConfig,
    pub transport: Arc<dyn JobTransport>,
    pub pool: Option<PgPool>,
    pub events: Arc<EventDispatcher>,
    pub client: QueueClient,
}

impl Runtime {
    /// Connect to the configured queue. Events are mirrored to the log and,
    /// on PostgreSQL, to the `job_events` table.
    pub async fn connect(config: SystemConfig) -> Result<Self, RuntimeError> {
        let max_connections = (config.worker.concurrency as u32).saturating_add(2);
        let handle = pushq_scheduler::connect(&config.queue, max_connections).await?;

        let mut events = EventDispatcher::new().with_sink(Arc::new(TracingEventSink));
        if let Some(pool) = &handle.pool {
            events = events.with_sink(Arc::new(PgEventRepo::new(pool.clone())));
        }
        let events = Arc::new(events);
        let client = QueueClient::new(handle.transport.clone(), events.clone());

        Ok(Self {
            config,
            transport: handle.transport,
            pool: handle.pool,
            events,
            client,
        })
    }

    /// Audit store for reading events back, when the transport has one.
    pub fn event_repo(&self) -> Option<Arc<dyn EventRepo>> {
        self.pool
            .as_ref()
            .map(|pool| Arc::new(PgEventRepo::new(pool.clone())) as Arc<dyn EventRepo>)
    }

    pub fn executor(&self) -> Result<PipelineExecutor, RuntimeError> {
        let collaborators = submit_collaborators(&self.config)?;
        Ok(PipelineExecutor::with_collaborators(
            &collaborators,
            self.events.clone(),
            Arc::new(CleanupSweeper::new(&self.config.work_root)),
            self.config.worker.job_timeout,
        ))
    }

    /// A worker pool sized and timed from the worker settings.
    pub fn worker_pool(&self) -> Result<WorkerPool, RuntimeError> {
        let settings = &self.config.worker;
        Ok(WorkerPool::new(
            settings.concurrency,
            self.transport.clone(),
            Arc::new(self.executor()?),
            self.events.clone(),
        )
        .with_poll_interval(settings.poll_interval)
        .with_visibility_timeout(settings.visibility_timeout))
    }

    /// Release transport resources.
    pub async fn close(&self) {
        self.transport.close().await;
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushq_core::JobId;

    #[tokio::test]
    async fn test_default_config_runs_on_memory_queue() {
        let runtime = Runtime::connect(SystemConfig::default()).await.unwrap();
        assert_eq!(runtime.transport.name(), "memory");
        assert!(runtime.pool.is_none());
        assert!(runtime.event_repo().is_none());

        let handle = runtime.client.submit_test(JobId::from(1)).await.unwrap();
        assert_eq!(handle.id, JobId::from(1));
        runtime.close().await;
    }

    #[tokio::test]
    async fn test_test_job_completes_through_worker_pool() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SystemConfig::default();
        config.work_root = dir.path().to_path_buf();
        config.worker.poll_interval = std::time::Duration::from_millis(10);

        let runtime = Runtime::connect(config).await.unwrap();
        let mut rx = runtime.client.subscribe();
        let pool = runtime.worker_pool().unwrap().spawn("test");

        runtime.client.submit_test(JobId::from(9)).await.unwrap();
        loop {
            let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if event.kind.is_terminal() {
                assert_eq!(event.kind.name(), "completed");
                break;
            }
        }
        pool.shutdown().await;
    }
}
