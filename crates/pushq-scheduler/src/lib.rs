//! Job scheduling for pushq.
//!
//! Accepts jobs through the [`QueueClient`], stores them in a
//! [`JobTransport`] (PostgreSQL with SKIP LOCKED, or in-process memory) and
//! runs them on [`Worker`]s through the [`PipelineExecutor`].

pub mod cleanup;
pub mod client;
pub mod error;
pub mod events;
pub mod memory;
pub mod orchestrator;
pub mod queue;
pub mod rollback;
pub mod stages;
pub mod worker;

pub use cleanup::{CleanupSweeper, Sweeper, WorkspaceGuard};
pub use client::{JobHandle, QueueClient};
pub use error::{QueueError, QueueResult};
pub use events::{EventDispatcher, TracingEventSink};
pub use memory::{MemoryJobState, MemoryQueue};
pub use orchestrator::{
    JobOutcome, PipelineExecutor, PipelineRun, PipelineStages, StageState, SUCCESS_MESSAGE,
};
pub use queue::{ClaimedJob, JobTransport, PgJobQueue, TransportHandle, connect};
pub use rollback::{RollbackCoordinator, RollbackReport};
pub use stages::SubmitCollaborators;
pub use worker::{Worker, WorkerPool, WorkerPoolHandle};

#[cfg(test)]
mod test_support;
