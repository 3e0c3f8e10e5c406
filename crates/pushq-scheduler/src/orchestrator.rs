//! Pipeline executor - runs a job's stages in order and handles failure.

use pushq_core::stage::Stage;
use pushq_core::{Error, JobEventKind, JobId, JobKind, JobRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::stages::{DiagnosticStage, SubmitCollaborators};
use crate::{EventDispatcher, RollbackCoordinator, RollbackReport, Sweeper, WorkspaceGuard};

/// Completion message of a successful submit job.
pub const SUCCESS_MESSAGE: &str = "Code successfully pushed to github for processing.";

/// Completion message of a test job.
pub const TEST_SUCCESS_MESSAGE: &str = "Test job finished processing.";

/// State of a stage after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageState {
    Succeeded,
    Failed { message: String },
    Skipped { reason: String },
}

impl StageState {
    pub fn is_success(&self) -> bool {
        matches!(self, StageState::Succeeded)
    }
}

/// Terminal outcome of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { message: String },
    /// `error` is the original error of the failing stage.
    Failed { stage: &'static str, error: Error },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }

    /// The lifecycle event that reports this outcome.
    pub fn event_kind(&self) -> JobEventKind {
        match self {
            JobOutcome::Completed { message } => JobEventKind::Completed {
                message: message.clone(),
            },
            JobOutcome::Failed { error, .. } => JobEventKind::Failed {
                error: error.clone(),
            },
        }
    }
}

/// Result of processing a job.
#[derive(Debug)]
pub struct PipelineRun {
    pub job_id: JobId,
    pub outcome: JobOutcome,
    /// Every stage of the pipeline, in order.
    pub stage_states: Vec<(&'static str, StageState)>,
    /// The last record produced: the final one on success, the input of the
    /// failing stage otherwise.
    pub record: JobRecord,
    /// Present only when the run failed.
    pub rollback: Option<RollbackReport>,
}

/// The stage lists per job kind.
pub struct PipelineStages {
    pub submit: Vec<Arc<dyn Stage>>,
    pub test: Vec<Arc<dyn Stage>>,
}

impl PipelineStages {
    /// Given submit stages plus the built-in diagnostic test stage.
    pub fn new(submit: Vec<Arc<dyn Stage>>) -> Self {
        Self {
            submit,
            test: vec![Arc::new(DiagnosticStage)],
        }
    }

    pub fn for_kind(&self, kind: JobKind) -> &[Arc<dyn Stage>] {
        match kind {
            JobKind::Submit => &self.submit,
            JobKind::Test => &self.test,
        }
    }
}

/// Where a run got to; survives the run future being dropped on timeout.
struct Progress {
    record: JobRecord,
    completed: Vec<&'static str>,
}

/// Runs pipelines for dequeued jobs.
pub struct PipelineExecutor {
    stages: PipelineStages,
    rollback: RollbackCoordinator,
    sweeper: Arc<dyn Sweeper>,
    job_timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(
        stages: PipelineStages,
        rollback: RollbackCoordinator,
        sweeper: Arc<dyn Sweeper>,
        job_timeout: Duration,
    ) -> Self {
        Self {
            stages,
            rollback,
            sweeper,
            job_timeout,
        }
    }

    /// Create an executor running the standard submit pipeline.
    pub fn with_collaborators(
        collaborators: &SubmitCollaborators,
        events: Arc<EventDispatcher>,
        sweeper: Arc<dyn Sweeper>,
        job_timeout: Duration,
    ) -> Self {
        let rollback = RollbackCoordinator::new(
            collaborators.rollback.clone(),
            collaborators.notifier.clone(),
            events,
        );
        Self::new(
            PipelineStages::new(collaborators.submit_stages()),
            rollback,
            sweeper,
            job_timeout,
        )
    }

    /// Process one job to a terminal outcome.
    ///
    /// Stages run strictly one after another; the first failure (or the job
    /// timeout) skips the rest and triggers rollback. Cleanup runs exactly
    /// once on every path.
    pub async fn process(&self, job: JobRecord) -> PipelineRun {
        let guard = WorkspaceGuard::acquire(self.sweeper.clone(), job.id.clone());
        let job_id = job.id.clone();
        let kind = job.kind;
        let stages = self.stages.for_kind(kind);

        let mut progress = Progress {
            record: job,
            completed: Vec::with_capacity(stages.len()),
        };

        let timed = tokio::time::timeout(self.job_timeout, run_stages(stages, &mut progress)).await;
        let result = match timed {
            Ok(result) => result,
            Err(_) => {
                let stage = stages
                    .get(progress.completed.len())
                    .map(|s| s.name())
                    .unwrap_or("none");
                error!(job_id = %job_id, stage, timeout = ?self.job_timeout, "Job timed out");
                Err(Error::Timeout(format!(
                    "job exceeded {}s during stage '{}'",
                    self.job_timeout.as_secs_f64(),
                    stage
                )))
            }
        };

        let failed_at = progress.completed.len();
        let (outcome, record, rollback) = match result {
            Ok(record) => {
                let message = match kind {
                    JobKind::Submit => SUCCESS_MESSAGE,
                    JobKind::Test => TEST_SUCCESS_MESSAGE,
                };
                (
                    JobOutcome::Completed {
                        message: message.to_string(),
                    },
                    record,
                    None,
                )
            }
            Err(error) => {
                let stage = stages.get(failed_at).map(|s| s.name()).unwrap_or("none");
                let report = self
                    .rollback
                    .handle_failure(&progress.record, &progress.completed, &error)
                    .await;
                (
                    JobOutcome::Failed { stage, error },
                    progress.record,
                    Some(report),
                )
            }
        };

        guard.release();

        let stage_states = stages
            .iter()
            .enumerate()
            .map(|(idx, stage)| {
                let state = match (&outcome, idx.cmp(&failed_at)) {
                    (JobOutcome::Completed { .. }, _) | (_, std::cmp::Ordering::Less) => {
                        StageState::Succeeded
                    }
                    (JobOutcome::Failed { error, .. }, std::cmp::Ordering::Equal) => {
                        StageState::Failed {
                            message: error.to_string(),
                        }
                    }
                    (JobOutcome::Failed { stage, .. }, std::cmp::Ordering::Greater) => {
                        StageState::Skipped {
                            reason: format!("stage '{}' failed", stage),
                        }
                    }
                };
                (stage.name(), state)
            })
            .collect();

        PipelineRun {
            job_id,
            outcome,
            stage_states,
            record,
            rollback,
        }
    }
}

async fn run_stages(stages: &[Arc<dyn Stage>], progress: &mut Progress) -> pushq_core::Result<JobRecord> {
    for stage in stages {
        let job_id = progress.record.id.clone();
        debug!(job_id = %job_id, stage = stage.name(), "Starting stage");

        match stage.run(progress.record.clone()).await {
            Ok(record) => {
                info!(job_id = %job_id, stage = stage.name(), "Stage completed successfully");
                progress.record = record;
                progress.completed.push(stage.name());
            }
            Err(e) => {
                error!(job_id = %job_id, stage = stage.name(), error = %e, "Stage failed");
                return Err(e);
            }
        }
    }
    Ok(progress.record.clone())
}
