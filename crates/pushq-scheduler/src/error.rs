//! Queue transport errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database setup failed: {0}")]
    Setup(#[from] pushq_db::DbError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid job: {0}")]
    InvalidJob(#[from] pushq_core::Error),

    #[error("job {0} is already queued")]
    Duplicate(String),

    #[error("job {0} is not known to the queue")]
    UnknownJob(String),

    #[error("queue is closed")]
    Closed,
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
