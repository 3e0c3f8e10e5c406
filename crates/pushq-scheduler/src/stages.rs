//! The stages of the submit and test pipelines.
//!
//! Each stage adapts one collaborator call to the [`Stage`] trait so the
//! executor can treat the pipeline as a plain ordered list.

use async_trait::async_trait;
use pushq_core::stage::{
    ArchiveSource, MetadataWriter, Notifier, RemotePublisher, RollbackHandler, Stage,
};
use pushq_core::{JobRecord, Result};
use std::sync::Arc;
use tracing::info;

/// Everything the submit pipeline and its rollback call out to.
#[derive(Clone)]
pub struct SubmitCollaborators {
    pub archive: Arc<dyn ArchiveSource>,
    pub metadata: Arc<dyn MetadataWriter>,
    pub publisher: Arc<dyn RemotePublisher>,
    pub notifier: Arc<dyn Notifier>,
    pub rollback: Arc<dyn RollbackHandler>,
}

impl SubmitCollaborators {
    /// The six submit stages, in execution order.
    pub fn submit_stages(&self) -> Vec<Arc<dyn Stage>> {
        vec![
            Arc::new(DownloadArchive(self.archive.clone())),
            Arc::new(AddJobProperties(self.metadata.clone())),
            Arc::new(AddBuildProperties(self.metadata.clone())),
            Arc::new(AddGeneratedAssets(self.metadata.clone())),
            Arc::new(PushToRemote(self.publisher.clone())),
            Arc::new(SendSubmittedNotification(self.notifier.clone())),
        ]
    }
}

pub struct DownloadArchive(pub Arc<dyn ArchiveSource>);

#[async_trait]
impl Stage for DownloadArchive {
    fn name(&self) -> &'static str {
        "download-archive"
    }

    async fn run(&self, job: JobRecord) -> Result<JobRecord> {
        self.0.download_archive(job).await
    }
}

pub struct AddJobProperties(pub Arc<dyn MetadataWriter>);

#[async_trait]
impl Stage for AddJobProperties {
    fn name(&self) -> &'static str {
        "add-job-properties"
    }

    async fn run(&self, job: JobRecord) -> Result<JobRecord> {
        self.0.add_job_properties(job).await
    }
}

pub struct AddBuildProperties(pub Arc<dyn MetadataWriter>);

#[async_trait]
impl Stage for AddBuildProperties {
    fn name(&self) -> &'static str {
        "add-build-properties"
    }

    async fn run(&self, job: JobRecord) -> Result<JobRecord> {
        self.0.add_build_properties(job).await
    }
}

pub struct AddGeneratedAssets(pub Arc<dyn MetadataWriter>);

#[async_trait]
impl Stage for AddGeneratedAssets {
    fn name(&self) -> &'static str {
        "add-generated-assets"
    }

    async fn run(&self, job: JobRecord) -> Result<JobRecord> {
        self.0.add_generated_assets(job).await
    }
}

pub struct PushToRemote(pub Arc<dyn RemotePublisher>);

#[async_trait]
impl Stage for PushToRemote {
    fn name(&self) -> &'static str {
        "push-to-remote"
    }

    async fn run(&self, job: JobRecord) -> Result<JobRecord> {
        self.0.push(job).await
    }
}

pub struct SendSubmittedNotification(pub Arc<dyn Notifier>);

#[async_trait]
impl Stage for SendSubmittedNotification {
    fn name(&self) -> &'static str {
        "send-submitted-notification"
    }

    async fn run(&self, job: JobRecord) -> Result<JobRecord> {
        self.0.send_submitted(&job).await?;
        Ok(job)
    }
}

/// The only stage of a test job. Touches nothing outside the process.
pub struct DiagnosticStage;

#[async_trait]
impl Stage for DiagnosticStage {
    fn name(&self) -> &'static str {
        "diagnostic"
    }

    async fn run(&self, job: JobRecord) -> Result<JobRecord> {
        info!(job_id = %job.id, "[test] submitted successfully and finished processing");
        Ok(job)
    }
}
