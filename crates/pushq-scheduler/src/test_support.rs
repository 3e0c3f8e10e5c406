//! Stub collaborators shared by the scheduler tests.

use async_trait::async_trait;
use pushq_core::stage::{
    ArchiveSource, MetadataWriter, Notifier, RemotePublisher, RollbackHandler, Stage,
};
use pushq_core::{Error, JobId, JobRecord, JobWorkspace, Result, SubmitPayload};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::Sweeper;

pub const STAGE_NAMES: [&str; 6] = [
    "download-archive",
    "add-job-properties",
    "add-build-properties",
    "add-generated-assets",
    "push-to-remote",
    "send-submitted-notification",
];

pub fn submit_job(id: u64) -> JobRecord {
    let payload = SubmitPayload {
        source_url: "https://example.com/source.zip".to_string(),
        repository: "acme/widgets".to_string(),
        owner_email: "owner@example.com".to_string(),
        build: HashMap::new(),
    };
    JobRecord::submit(JobId::from(id), &payload).unwrap()
}

/// Counts calls, optionally fails or hangs, and adds one property per run.
pub struct StubStage {
    name: &'static str,
    fail: Option<Error>,
    hang: AtomicBool,
    pub calls: AtomicUsize,
    pub seen_property_count: Mutex<Option<usize>>,
}

impl StubStage {
    pub fn new(name: &'static str, fail: Option<Error>) -> Self {
        Self {
            name,
            fail,
            hang: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            seen_property_count: Mutex::new(None),
        }
    }

    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Stage for StubStage {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, mut job: JobRecord) -> Result<JobRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen_property_count.lock().unwrap() = Some(job.properties.len());
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(e) = &self.fail {
            return Err(e.clone());
        }
        job.properties.insert(self.name, true);
        Ok(job)
    }
}

#[derive(Default)]
pub struct StubRollback {
    fail: Mutex<Option<Error>>,
    pub calls: AtomicUsize,
    pub ids: Mutex<Vec<JobId>>,
    pub completed: Mutex<Vec<Vec<&'static str>>>,
}

impl StubRollback {
    pub fn fail_with(&self, error: Error) {
        *self.fail.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl RollbackHandler for StubRollback {
    async fn rollback(&self, job: &JobRecord, completed: &[&'static str]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ids.lock().unwrap().push(job.id.clone());
        self.completed.lock().unwrap().push(completed.to_vec());
        match self.fail.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct StubNotifier {
    error_failure: Mutex<Option<Error>>,
    pub submitted: AtomicUsize,
    pub errors: Mutex<Vec<(JobId, Error)>>,
}

impl StubNotifier {
    pub fn fail_errors_with(&self, error: Error) {
        *self.error_failure.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl Notifier for StubNotifier {
    async fn send_submitted(&self, _job: &JobRecord) -> Result<()> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_error(&self, job: &JobRecord, error: &Error) -> Result<()> {
        self.errors
            .lock()
            .unwrap()
            .push((job.id.clone(), error.clone()));
        match self.error_failure.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct CountingSweeper {
    calls: Mutex<HashMap<JobId, usize>>,
}

impl CountingSweeper {
    pub fn calls_for(&self, job_id: &JobId) -> usize {
        self.calls.lock().unwrap().get(job_id).copied().unwrap_or(0)
    }
}

impl Sweeper for CountingSweeper {
    fn cleanup(&self, job_id: &JobId) {
        *self.calls.lock().unwrap().entry(job_id.clone()).or_default() += 1;
    }
}

/// Creates the job's download and keys directories, then succeeds or fails.
pub struct WorkspaceArchive {
    root: PathBuf,
    fail: Option<Error>,
    pub created: AtomicBool,
}

impl WorkspaceArchive {
    pub fn new(root: &Path, fail: Option<Error>) -> Self {
        Self {
            root: root.to_path_buf(),
            fail,
            created: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ArchiveSource for WorkspaceArchive {
    async fn download_archive(&self, mut job: JobRecord) -> Result<JobRecord> {
        let ws = JobWorkspace::new(&self.root, &job.id);
        std::fs::create_dir_all(ws.source_dir())?;
        std::fs::create_dir_all(&ws.keys_dir)?;
        std::fs::write(ws.keys_dir.join("deploy_key"), "secret")?;
        self.created.store(true, Ordering::SeqCst);
        if let Some(e) = &self.fail {
            return Err(e.clone());
        }
        job.properties
            .insert("archive.path", ws.source_dir().display().to_string());
        Ok(job)
    }
}

#[derive(Default)]
pub struct StubMetadata {
    pub order: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl MetadataWriter for StubMetadata {
    async fn add_job_properties(&self, mut job: JobRecord) -> Result<JobRecord> {
        self.order.lock().unwrap().push("job");
        job.properties.insert("job.id", job.id.to_string());
        Ok(job)
    }

    async fn add_build_properties(&self, mut job: JobRecord) -> Result<JobRecord> {
        self.order.lock().unwrap().push("build");
        job.properties.require("archive.path")?;
        job.properties.insert("build.target", "release");
        Ok(job)
    }

    async fn add_generated_assets(&self, mut job: JobRecord) -> Result<JobRecord> {
        self.order.lock().unwrap().push("assets");
        job.properties.require("build.target")?;
        job.properties.insert("assets.manifest", "pushq.json");
        Ok(job)
    }
}

#[derive(Default)]
pub struct StubPublisher {
    pub calls: AtomicUsize,
}

#[async_trait]
impl RemotePublisher for StubPublisher {
    async fn push(&self, mut job: JobRecord) -> Result<JobRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        job.properties.require("assets.manifest")?;
        job.properties.insert("remote.branch", format!("submission/{}", job.id));
        Ok(job)
    }
}
