//! Lifecycle events published for every job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, JobId, JobKind};

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEventKind {
    Enqueued,
    Started,
    Completed { message: String },
    Failed { error: Error },
    /// Rollback after a failure did not succeed. Informational only: the
    /// job's error of record stays the one carried by `Failed`.
    RollbackFailed { error: Error },
}

impl JobEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobEventKind::Enqueued => "enqueued",
            JobEventKind::Started => "started",
            JobEventKind::Completed { .. } => "completed",
            JobEventKind::Failed { .. } => "failed",
            JobEventKind::RollbackFailed { .. } => "rollback_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEventKind::Completed { .. } | JobEventKind::Failed { .. }
        )
    }
}

/// A lifecycle event, correlated by job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub job_kind: JobKind,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: JobId, job_kind: JobKind, kind: JobEventKind) -> Self {
        Self {
            job_id,
            job_kind,
            kind,
            at: Utc::now(),
        }
    }

    /// Human-readable description, as written to the audit log.
    pub fn describe(&self) -> String {
        match &self.kind {
            JobEventKind::Enqueued => "job has been added to the queue.".to_string(),
            JobEventKind::Started => "job has started processing.".to_string(),
            JobEventKind::Completed { message } => {
                format!("job completed the queue successfully: {message}")
            }
            JobEventKind::Failed { error } => {
                format!("job failed in the queue with the following error: {error}")
            }
            JobEventKind::RollbackFailed { error } => format!("rollback failed: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_event_serializes_original_error() {
        let event = JobEvent::new(
            JobId::from(42),
            JobKind::Submit,
            JobEventKind::Failed {
                error: Error::Network("unreachable".to_string()),
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "failed");
        assert_eq!(json["job_id"], "42");

        let back: JobEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert!(event.describe().contains("unreachable"));
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(!JobEventKind::Enqueued.is_terminal());
        assert!(
            JobEventKind::Completed {
                message: "ok".to_string()
            }
            .is_terminal()
        );
        assert!(
            !JobEventKind::RollbackFailed {
                error: Error::Rollback("x".to_string())
            }
            .is_terminal()
        );
    }
}
