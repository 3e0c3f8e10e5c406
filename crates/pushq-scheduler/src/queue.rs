//! Job queue transport.
//!
//! The [`JobTransport`] trait is the only thing workers and clients know
//! about the queue. [`PgJobQueue`] stores jobs in PostgreSQL and claims them
//! with SKIP LOCKED; [`MemoryQueue`](crate::MemoryQueue) keeps them in
//! process.

use async_trait::async_trait;
use pushq_config::{QueueBackend, QueueEndpoint};
use pushq_core::{JobId, JobRecord};
use sqlx::PgPool;
use sqlx::types::Json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::{MemoryQueue, QueueError, QueueResult};

/// A job handed to a worker.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub record: JobRecord,
    /// 1 on first delivery; higher when the job was redelivered.
    pub attempt: u32,
}

/// At-least-once job transport.
#[async_trait]
pub trait JobTransport: Send + Sync {
    /// Name of this transport.
    fn name(&self) -> &'static str;

    /// Store a job for later processing. Fails on duplicate ids.
    async fn enqueue(&self, job: &JobRecord) -> QueueResult<()>;

    /// Claim the next pending job, if any.
    async fn claim(&self, worker_id: &str) -> QueueResult<Option<ClaimedJob>>;

    /// Mark a claimed job as completed.
    async fn complete(&self, job_id: &JobId, message: &str) -> QueueResult<()>;

    /// Mark a claimed job as failed.
    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<()>;

    /// Hand a claimed job back to pending.
    async fn release(&self, job_id: &JobId) -> QueueResult<()>;

    /// Release claims older than `older_than`; returns how many were released.
    async fn requeue_stale(&self, older_than: Duration) -> QueueResult<u64>;

    /// Wait until work may be available, at most `poll` long.
    async fn idle(&self, poll: Duration) {
        tokio::time::sleep(poll).await;
    }

    /// Release transport resources at shutdown.
    async fn close(&self) {}
}

/// A connected transport plus the database pool behind it, if any.
pub struct TransportHandle {
    pub transport: Arc<dyn JobTransport>,
    pub pool: Option<PgPool>,
}

/// Connect to the transport described by `endpoint`.
///
/// PostgreSQL endpoints get their migrations applied before use.
pub async fn connect(endpoint: &QueueEndpoint, max_connections: u32) -> QueueResult<TransportHandle> {
    match endpoint.backend {
        QueueBackend::Memory => {
            info!("Using in-process memory queue");
            Ok(TransportHandle {
                transport: Arc::new(MemoryQueue::new()),
                pool: None,
            })
        }
        QueueBackend::Postgres => {
            info!(endpoint = %endpoint.redacted(), "Connecting to queue database");
            let pool = pushq_db::create_pool(endpoint, max_connections).await?;
            pushq_db::run_migrations(&pool).await?;
            info!("Queue database connected");
            Ok(TransportHandle {
                transport: Arc::new(PgJobQueue::new(pool.clone())),
                pool: Some(pool),
            })
        }
    }
}

/// Job queue backed by PostgreSQL.
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobTransport for PgJobQueue {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn enqueue(&self, job: &JobRecord) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_queue (id, kind, record, status, created_at)
            VALUES ($1, $2, $3, 'pending', $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.kind.as_str())
        .bind(Json(job))
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::Duplicate(job.id.to_string()));
        }
        Ok(())
    }

    /// Uses SKIP LOCKED to prevent contention between workers.
    async fn claim(&self, worker_id: &str) -> QueueResult<Option<ClaimedJob>> {
        let row: Option<(Json<JobRecord>, i32)> = sqlx::query_as(
            r#"
            UPDATE job_queue
            SET status = 'claimed', claimed_by = $1, claimed_at = NOW(), attempts = attempts + 1
            WHERE id = (
                SELECT id FROM job_queue
                WHERE status = 'pending'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING record, attempts
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(Json(record), attempts)| ClaimedJob {
            record,
            attempt: u32::try_from(attempts).unwrap_or(u32::MAX),
        }))
    }

    async fn complete(&self, job_id: &JobId, message: &str) -> QueueResult<()> {
        sqlx::query(
            "UPDATE job_queue SET status = 'completed', message = $2, finished_at = NOW() WHERE id = $1",
        )
        .bind(job_id.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        sqlx::query(
            "UPDATE job_queue SET status = 'failed', error = $2, finished_at = NOW() WHERE id = $1",
        )
        .bind(job_id.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release(&self, job_id: &JobId) -> QueueResult<()> {
        sqlx::query(
            "UPDATE job_queue SET status = 'pending', claimed_by = NULL, claimed_at = NULL WHERE id = $1 AND status = 'claimed'",
        )
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn requeue_stale(&self, older_than: Duration) -> QueueResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL
            WHERE status = 'claimed' AND claimed_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
