//! In-process job queue.
//!
//! Used when no queue URL is configured. Jobs only reach workers running in
//! the same process and are lost when it exits.

use async_trait::async_trait;
use pushq_core::{JobId, JobRecord};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::{ClaimedJob, JobTransport, QueueError, QueueResult};

/// Where a job is in the memory queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryJobState {
    Pending,
    Claimed { by: String },
    Completed { message: String },
    Failed { error: String },
}

struct Entry {
    record: JobRecord,
    state: MemoryJobState,
    attempts: u32,
    claimed_at: Option<Instant>,
}

impl MemoryJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MemoryJobState::Completed { .. } | MemoryJobState::Failed { .. }
        )
    }
}

/// Finished jobs kept for [`MemoryQueue::state_of`] before the oldest are
/// dropped.
pub const DEFAULT_RETENTION: usize = 1024;

#[derive(Default)]
struct State {
    pending: VecDeque<JobId>,
    jobs: HashMap<JobId, Entry>,
    /// Terminal jobs, oldest first.
    finished: VecDeque<JobId>,
    closed: bool,
}

/// Job queue held in process memory.
///
/// Only the most recent `retention` finished jobs are remembered; an id is
/// free to be submitted again once its job has been forgotten.
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    retention: usize,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            retention: DEFAULT_RETENTION,
        }
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state of a job, if the queue has seen it.
    pub fn state_of(&self, job_id: &JobId) -> Option<MemoryJobState> {
        self.lock().jobs.get(job_id).map(|e| e.state.clone())
    }

    /// Number of jobs waiting to be claimed.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn finish(&self, job_id: &JobId, state: MemoryJobState) -> QueueResult<()> {
        let mut guard = self.lock();
        let entry = guard
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        let newly_finished = !entry.state.is_terminal();
        entry.state = state;
        entry.claimed_at = None;

        if newly_finished {
            guard.finished.push_back(job_id.clone());
            while guard.finished.len() > self.retention {
                if let Some(oldest) = guard.finished.pop_front() {
                    guard.jobs.remove(&oldest);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobTransport for MemoryQueue {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn enqueue(&self, job: &JobRecord) -> QueueResult<()> {
        {
            let mut guard = self.lock();
            if guard.closed {
                return Err(QueueError::Closed);
            }
            if guard.jobs.contains_key(&job.id) {
                return Err(QueueError::Duplicate(job.id.to_string()));
            }
            guard.jobs.insert(
                job.id.clone(),
                Entry {
                    record: job.clone(),
                    state: MemoryJobState::Pending,
                    attempts: 0,
                    claimed_at: None,
                },
            );
            guard.pending.push_back(job.id.clone());
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn claim(&self, worker_id: &str) -> QueueResult<Option<ClaimedJob>> {
        let mut guard = self.lock();
        if guard.closed {
            return Ok(None);
        }
        let Some(job_id) = guard.pending.pop_front() else {
            return Ok(None);
        };
        let entry = guard
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        entry.state = MemoryJobState::Claimed {
            by: worker_id.to_string(),
        };
        entry.attempts += 1;
        entry.claimed_at = Some(Instant::now());
        Ok(Some(ClaimedJob {
            record: entry.record.clone(),
            attempt: entry.attempts,
        }))
    }

    async fn complete(&self, job_id: &JobId, message: &str) -> QueueResult<()> {
        self.finish(
            job_id,
            MemoryJobState::Completed {
                message: message.to_string(),
            },
        )
    }

    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        self.finish(
            job_id,
            MemoryJobState::Failed {
                error: error.to_string(),
            },
        )
    }

    async fn release(&self, job_id: &JobId) -> QueueResult<()> {
        {
            let mut guard = self.lock();
            let entry = guard
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
            if !matches!(entry.state, MemoryJobState::Claimed { .. }) {
                return Ok(());
            }
            entry.state = MemoryJobState::Pending;
            entry.claimed_at = None;
            guard.pending.push_back(job_id.clone());
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn requeue_stale(&self, older_than: Duration) -> QueueResult<u64> {
        let released = {
            let mut guard = self.lock();
            let now = Instant::now();
            let stale: Vec<JobId> = guard
                .jobs
                .iter()
                .filter(|(_, e)| {
                    matches!(e.state, MemoryJobState::Claimed { .. })
                        && e.claimed_at
                            .is_some_and(|at| now.duration_since(at) >= older_than)
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                if let Some(entry) = guard.jobs.get_mut(id) {
                    entry.state = MemoryJobState::Pending;
                    entry.claimed_at = None;
                }
                guard.pending.push_back(id.clone());
            }
            stale.len() as u64
        };
        if released > 0 {
            self.notify.notify_waiters();
        }
        Ok(released)
    }

    async fn idle(&self, poll: Duration) {
        let _ = tokio::time::timeout(poll, self.notify.notified()).await;
    }

    async fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }
}
