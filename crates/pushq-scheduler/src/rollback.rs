//! Compensation after a failed pipeline run.

use pushq_core::stage::{Notifier, RollbackHandler};
use pushq_core::{Error, JobEvent, JobEventKind, JobRecord};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::EventDispatcher;

/// What happened while handling a failure. The job's error of record is not
/// part of this report; it stays the original stage error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub rollback_error: Option<Error>,
    pub notification_error: Option<Error>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.rollback_error.is_none() && self.notification_error.is_none()
    }
}

/// Reverts partial side effects, then tells the job owner about the failure.
pub struct RollbackCoordinator {
    handler: Arc<dyn RollbackHandler>,
    notifier: Arc<dyn Notifier>,
    events: Arc<EventDispatcher>,
}

impl RollbackCoordinator {
    pub fn new(
        handler: Arc<dyn RollbackHandler>,
        notifier: Arc<dyn Notifier>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            handler,
            notifier,
            events,
        }
    }

    /// Handle a failed run. `job` is the record as the failing stage received
    /// it and `completed` the stages that finished before it.
    ///
    /// Never fails: rollback and notification errors are logged and reported.
    pub async fn handle_failure(
        &self,
        job: &JobRecord,
        completed: &[&'static str],
        original: &Error,
    ) -> RollbackReport {
        error!(job_id = %job.id, error = %original, "[{}] queue error: {}", job.log_label(), original);

        let rollback_error = match self.handler.rollback(job, completed).await {
            Ok(()) => {
                info!(job_id = %job.id, ?completed, "Rolled back job");
                None
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Rollback failed");
                self.events
                    .publish(JobEvent::new(
                        job.id.clone(),
                        job.kind,
                        JobEventKind::RollbackFailed { error: e.clone() },
                    ))
                    .await;
                Some(e)
            }
        };

        let notification_error = match self.notifier.send_error(job, original).await {
            Ok(()) => None,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to send error notification");
                Some(e)
            }
        };

        RollbackReport {
            rollback_error,
            notification_error,
        }
    }
}
