//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not a PostgreSQL endpoint: {0}")]
    NotPostgres(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<DbError> for pushq_core::Error {
    fn from(err: DbError) -> Self {
        pushq_core::Error::Internal(err.to_string())
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
