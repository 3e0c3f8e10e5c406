//! Application state.

use pushq_db::EventRepo;
use pushq_scheduler::QueueClient;
use pushq_services::Runtime;
use sqlx::PgPool;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub client: QueueClient,
    pub event_repo: Option<Arc<dyn EventRepo>>,
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(client: QueueClient) -> Self {
        Self {
            client,
            event_repo: None,
            pool: None,
        }
    }

    pub fn from_runtime(runtime: &Runtime) -> Self {
        Self {
            client: runtime.client.clone(),
            event_repo: runtime.event_repo(),
            pool: runtime.pool.clone(),
        }
    }

    pub fn with_event_repo(mut self, repo: Arc<dyn EventRepo>) -> Self {
        self.event_repo = Some(repo);
        self
    }
}
