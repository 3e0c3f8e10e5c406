//! Database layer for pushq.
//!
//! Provides the connection pool, embedded migrations and the audit
//! event repository.

pub mod error;
pub mod events;

pub use error::{DbError, DbResult};
pub use events::{EventRecord, EventRepo, PgEventRepo};

use pushq_config::{QueueBackend, QueueEndpoint};
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::info;

/// Create a new database connection pool for a PostgreSQL endpoint.
pub async fn create_pool(endpoint: &QueueEndpoint, max_connections: u32) -> DbResult<PgPool> {
    if endpoint.backend != QueueBackend::Postgres {
        return Err(DbError::NotPostgres(endpoint.redacted()));
    }

    let mut options = PgConnectOptions::new()
        .host(&endpoint.host)
        .port(endpoint.port);
    if let Some(user) = &endpoint.username {
        options = options.username(user);
    }
    if let Some(password) = &endpoint.password {
        options = options.password(password);
    }
    if let Some(database) = &endpoint.database {
        options = options.database(database);
    }

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}
