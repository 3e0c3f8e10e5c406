//! Collaborator traits consumed by the pipeline.
//!
//! The worker only knows these seams; concrete downloads, git pushes and
//! mailers live in other crates and are injected at startup.

use async_trait::async_trait;

use crate::{Error, JobEvent, JobRecord, Result};

/// One step of a pipeline.
///
/// A stage takes the record produced by the previous stage and returns the
/// record for the next one.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable name, used in logs and rollback bookkeeping.
    fn name(&self) -> &'static str;

    async fn run(&self, job: JobRecord) -> Result<JobRecord>;
}

/// Fetches and unpacks the source archive of a job.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    async fn download_archive(&self, job: JobRecord) -> Result<JobRecord>;
}

/// Enriches the job record with metadata.
///
/// Each method fails with [`Error::MissingProperty`] when the property it
/// builds on has not been written yet.
#[async_trait]
pub trait MetadataWriter: Send + Sync {
    async fn add_job_properties(&self, job: JobRecord) -> Result<JobRecord>;

    async fn add_build_properties(&self, job: JobRecord) -> Result<JobRecord>;

    async fn add_generated_assets(&self, job: JobRecord) -> Result<JobRecord>;
}

/// Publishes an enriched job to the remote version-control host.
#[async_trait]
pub trait RemotePublisher: Send + Sync {
    async fn push(&self, job: JobRecord) -> Result<JobRecord>;
}

/// Sends outcome notifications to the job owner.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_submitted(&self, job: &JobRecord) -> Result<()>;

    async fn send_error(&self, job: &JobRecord, error: &Error) -> Result<()>;
}

/// Reverts external side effects of a failed job.
#[async_trait]
pub trait RollbackHandler: Send + Sync {
    /// `job` is the record as the failing stage received it; `completed`
    /// names the stages that finished before the failure, in order.
    async fn rollback(&self, job: &JobRecord, completed: &[&'static str]) -> Result<()>;
}

/// Receives a copy of every lifecycle event.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: &JobEvent) -> Result<()>;
}
