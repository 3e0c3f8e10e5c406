//! Git publishing of prepared source trees.

use async_trait::async_trait;
use pushq_config::GitHubSettings;
use pushq_core::stage::{RemotePublisher, RollbackHandler};
use pushq_core::{Error, JobId, JobRecord};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

const COMMIT_AUTHOR: [&str; 4] = ["-c", "user.name=pushq", "-c", "user.email=pushq@localhost"];

/// How long rollback waits for an interrupted push to settle before killing it.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(120);

/// A push whose stage future went away before git finished.
struct InFlightPush {
    done: watch::Receiver<bool>,
    abort: AbortHandle,
}

/// Pushes the unpacked source tree to `<remote>/<repository>.git` on a
/// per-job branch, and deletes that branch again on rollback.
///
/// The git commands of a push run in their own task. A job timeout drops the
/// stage but not the push, so rollback can wait for it and then delete
/// whatever branch it created.
pub struct GitPublisher {
    settings: GitHubSettings,
    access_token: Option<String>,
    settle_timeout: Duration,
    in_flight: Mutex<HashMap<JobId, InFlightPush>>,
}

impl GitPublisher {
    /// Build a publisher, reading the access token from `settings.token_env`.
    pub fn from_settings(settings: GitHubSettings) -> Self {
        let access_token = std::env::var(&settings.token_env)
            .ok()
            .filter(|t| !t.is_empty());
        Self {
            settings,
            access_token,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Branch a job is pushed to.
    pub fn branch_for(&self, job_id: &JobId) -> String {
        format!("{}{}", self.settings.branch_prefix, job_id)
    }

    /// Remote URL without credentials.
    pub fn remote_url(&self, repository: &str) -> Result<String, GitError> {
        let valid = repository.split('/').count() == 2
            && repository
                .split('/')
                .all(|part| !part.is_empty() && part != "." && part != "..");
        if !valid {
            return Err(GitError::InvalidRepository(repository.to_string()));
        }
        Ok(format!(
            "{}/{}.git",
            self.settings.remote.trim_end_matches('/'),
            repository
        ))
    }

    /// https://github.com/owner/repo.git -> https://token@github.com/owner/repo.git
    fn authenticated(&self, url: &str) -> String {
        match (&self.access_token, url.strip_prefix("https://")) {
            (Some(token), Some(rest)) => format!("https://{}@{}", token, rest),
            _ => url.to_string(),
        }
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<(), GitError> {
        run_git(dir, args, self.access_token.as_deref()).await
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<JobId, InFlightPush>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for an interrupted push of `job_id` to finish, killing it after
    /// the settle timeout. Returns whether a push was in flight.
    async fn settle(&self, job_id: &JobId) -> bool {
        let in_flight = self.in_flight().remove(job_id);
        let Some(InFlightPush { mut done, abort }) = in_flight else {
            return false;
        };
        debug!(job_id = %job_id, "Waiting for interrupted push to finish");
        // The sender is dropped with the task, which also ends the wait.
        if tokio::time::timeout(self.settle_timeout, done.wait_for(|done| *done))
            .await
            .is_err()
        {
            warn!(job_id = %job_id, timeout = ?self.settle_timeout, "Interrupted push did not finish; killing it");
            abort.abort();
        }
        true
    }
}

async fn run_git(dir: &Path, args: &[&str], token: Option<&str>) -> Result<(), GitError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // The remote URL may carry the token; never surface it.
        let message = match token {
            Some(token) => stderr.replace(token, "[REDACTED]"),
            None => stderr.into_owned(),
        };
        return Err(GitError::CommandFailed {
            command: args
                .iter()
                .find(|a| !a.starts_with('-') && !a.contains('='))
                .map(|a| a.to_string())
                .unwrap_or_default(),
            message: message.trim().to_string(),
        });
    }
    Ok(())
}

/// Commit everything under `dir` and force-push it to `refspec`.
async fn push_tree(
    dir: PathBuf,
    target: String,
    refspec: String,
    message: String,
    token: Option<String>,
) -> Result<(), GitError> {
    let token = token.as_deref();
    run_git(&dir, &["init", "-q"], token).await?;
    run_git(&dir, &["add", "-A"], token).await?;
    let mut commit = COMMIT_AUTHOR.to_vec();
    commit.extend(["commit", "-q", "--allow-empty", "-m", message.as_str()]);
    run_git(&dir, &commit, token).await?;
    run_git(&dir, &["push", "-q", "--force", &target, &refspec], token).await
}

#[async_trait]
impl RemotePublisher for GitPublisher {
    async fn push(&self, mut job: JobRecord) -> pushq_core::Result<JobRecord> {
        let payload = job.submit_payload()?;
        let source = job.properties.require_str("archive.path")?.to_string();
        job.properties.require("assets.manifest")?;

        let remote = self.remote_url(&payload.repository)?;
        let branch = self.branch_for(&job.id);

        info!(job_id = %job.id, remote = %remote, branch = %branch, "Pushing source tree");

        let (done_tx, done_rx) = watch::channel(false);
        let push = push_tree(
            PathBuf::from(source),
            self.authenticated(&remote),
            format!("HEAD:refs/heads/{branch}"),
            format!("Submission {}", job.id),
            self.access_token.clone(),
        );
        let task = tokio::spawn(async move {
            let result = push.await;
            let _ = done_tx.send(true);
            result
        });
        self.in_flight().insert(
            job.id.clone(),
            InFlightPush {
                done: done_rx,
                abort: task.abort_handle(),
            },
        );

        let result = task.await;
        self.in_flight().remove(&job.id);
        match result {
            Ok(pushed) => pushed?,
            Err(e) => return Err(Error::Publish(format!("push task failed: {e}"))),
        }

        info!(job_id = %job.id, branch = %branch, "Code pushed to remote");
        job.properties.insert("remote.url", remote);
        job.properties.insert("remote.branch", branch);
        Ok(job)
    }
}

#[async_trait]
impl RollbackHandler for GitPublisher {
    /// Delete the job's branch if the push stage was ever entered.
    ///
    /// The failing record is the push stage's input, so it carries no remote
    /// properties after a timeout; the generated assets (or an interrupted
    /// push) mark that the push may have reached the remote.
    async fn rollback(&self, job: &JobRecord, completed: &[&'static str]) -> pushq_core::Result<()> {
        let interrupted = self.settle(&job.id).await;
        let entered = interrupted
            || job.properties.get("remote.branch").is_some()
            || job.properties.get("assets.manifest").is_some();
        if !entered {
            debug!(job_id = %job.id, ?completed, "Nothing pushed; no remote rollback needed");
            return Ok(());
        }

        let payload = job
            .submit_payload()
            .map_err(|e| Error::Rollback(e.to_string()))?;
        let remote = self
            .remote_url(&payload.repository)
            .map_err(|e| Error::Rollback(e.to_string()))?;
        let source = job
            .properties
            .require_str("archive.path")
            .map_err(|e| Error::Rollback(e.to_string()))?;
        let dir = Path::new(source);
        let branch = self.branch_for(&job.id);
        let target = self.authenticated(&remote);

        // A push killed before `git init` leaves no repository to push from.
        self.git(dir, &["init", "-q"])
            .await
            .map_err(|e| Error::Rollback(e.to_string()))?;
        match self.git(dir, &["push", "-q", &target, "--delete", &branch]).await {
            Ok(()) => {
                info!(job_id = %job.id, branch = %branch, "Deleted remote branch");
                Ok(())
            }
            Err(GitError::CommandFailed { message, .. })
                if message.contains("remote ref does not exist") =>
            {
                debug!(job_id = %job.id, branch = %branch, "Remote branch already absent");
                Ok(())
            }
            Err(e) => Err(Error::Rollback(e.to_string())),
        }
    }
}

/// Git operation errors.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Invalid repository name: {0}")]
    InvalidRepository(String),
}

impl From<GitError> for pushq_core::Error {
    fn from(err: GitError) -> Self {
        match err {
            GitError::InvalidRepository(_) => Error::InvalidInput(err.to_string()),
            _ => Error::Publish(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushq_core::SubmitPayload;
    use std::collections::HashMap;
    use std::process::Command as StdCommand;

    fn settings(remote: &str) -> GitHubSettings {
        GitHubSettings {
            remote: remote.to_string(),
            token_env: "PUSHQ_TEST_UNSET_TOKEN".to_string(),
            branch_prefix: "submission/".to_string(),
        }
    }

    fn git_available() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn prepared_job(source: &Path) -> JobRecord {
        let payload = SubmitPayload {
            source_url: "https://example.com/source.zip".to_string(),
            repository: "acme/widgets".to_string(),
            owner_email: "owner@example.com".to_string(),
            build: HashMap::new(),
        };
        let mut job = JobRecord::submit(JobId::from(11), &payload).unwrap();
        job.properties
            .insert("archive.path", source.to_string_lossy().into_owned());
        job.properties.insert("assets.manifest", "pushq.json");
        job
    }

    fn remote_has_branch(bare: &Path, branch: &str) -> bool {
        StdCommand::new("git")
            .arg("--git-dir")
            .arg(bare)
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_remote_url_and_branch() {
        let publisher =
            GitPublisher::from_settings(settings("https://github.com/")).with_token(None);
        assert_eq!(
            publisher.remote_url("acme/widgets").unwrap(),
            "https://github.com/acme/widgets.git"
        );
        assert_eq!(publisher.branch_for(&JobId::from(42)), "submission/42");
        assert!(publisher.remote_url("../etc").is_err());
        assert!(publisher.remote_url("acme").is_err());
        assert!(publisher.remote_url("a/b/c").is_err());
    }

    #[test]
    fn test_token_is_only_added_to_https() {
        let publisher = GitPublisher::from_settings(settings("https://github.com"))
            .with_token(Some("s3cret".to_string()));
        assert_eq!(
            publisher.authenticated("https://github.com/acme/widgets.git"),
            "https://s3cret@github.com/acme/widgets.git"
        );
        assert_eq!(publisher.authenticated("/srv/git/a.git"), "/srv/git/a.git");
    }

    #[tokio::test]
    async fn test_token_is_redacted_from_errors() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = GitPublisher::from_settings(settings("https://github.com"))
            .with_token(Some("s3cret".to_string()));

        let err = publisher
            .git(dir.path(), &["push", "https://s3cret@127.0.0.1:9/x.git", "HEAD"])
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("s3cret"));
    }

    fn bare_remote(remotes: &Path) -> PathBuf {
        let bare = remotes.join("acme").join("widgets.git");
        std::fs::create_dir_all(&bare).unwrap();
        assert!(
            StdCommand::new("git")
                .args(["init", "-q", "--bare"])
                .arg(&bare)
                .status()
                .unwrap()
                .success()
        );
        bare
    }

    #[tokio::test]
    async fn test_rollback_without_push_is_a_no_op() {
        let publisher = GitPublisher::from_settings(settings("/nonexistent"));
        let mut job = prepared_job(Path::new("/nonexistent/src"));
        job.properties = Default::default();
        job.properties.insert("archive.path", "/nonexistent/src");

        publisher
            .rollback(&job, &["download-archive"])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_push_then_rollback_against_local_remote() {
        if !git_available() {
            return;
        }
        let remotes = tempfile::tempdir().unwrap();
        let bare = bare_remote(remotes.path());

        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("README"), "hello").unwrap();

        let publisher = GitPublisher::from_settings(settings(&remotes.path().to_string_lossy()))
            .with_token(None);
        let pushed = publisher.push(prepared_job(source.path())).await.unwrap();

        assert_eq!(
            pushed.properties.require_str("remote.branch").unwrap(),
            "submission/11"
        );
        assert!(remote_has_branch(&bare, "submission/11"));

        publisher.rollback(&pushed, &["push-to-remote"]).await.unwrap();
        assert!(!remote_has_branch(&bare, "submission/11"));

        // Branch already gone.
        publisher.rollback(&pushed, &["push-to-remote"]).await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_before_push_reached_remote() {
        if !git_available() {
            return;
        }
        let remotes = tempfile::tempdir().unwrap();
        let bare = bare_remote(remotes.path());
        let source = tempfile::tempdir().unwrap();

        let publisher = GitPublisher::from_settings(settings(&remotes.path().to_string_lossy()))
            .with_token(None);
        publisher
            .rollback(&prepared_job(source.path()), &["add-generated-assets"])
            .await
            .unwrap();

        assert!(!remote_has_branch(&bare, "submission/11"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_push_leaves_no_branch() {
        use pushq_scheduler::stages::PushToRemote;
        use pushq_scheduler::{
            CleanupSweeper, EventDispatcher, JobOutcome, PipelineExecutor, PipelineStages,
            RollbackCoordinator,
        };
        use std::os::unix::fs::PermissionsExt;
        use std::sync::Arc;

        if !git_available() {
            return;
        }
        let remotes = tempfile::tempdir().unwrap();
        let bare = bare_remote(remotes.path());
        // The remote accepts the push only after the job has timed out.
        let hook = bare.join("hooks").join("pre-receive");
        std::fs::create_dir_all(hook.parent().unwrap()).unwrap();
        std::fs::write(&hook, "#!/bin/sh\nsleep 1\n").unwrap();
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();

        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("README"), "hello").unwrap();
        let work = tempfile::tempdir().unwrap();

        let git = Arc::new(
            GitPublisher::from_settings(settings(&remotes.path().to_string_lossy()))
                .with_token(None),
        );
        let executor = PipelineExecutor::new(
            PipelineStages::new(vec![Arc::new(PushToRemote(git.clone()))]),
            RollbackCoordinator::new(
                git.clone(),
                Arc::new(crate::LogMailer::default()),
                Arc::new(EventDispatcher::new()),
            ),
            Arc::new(CleanupSweeper::new(work.path())),
            Duration::from_millis(300),
        );

        let run = executor.process(prepared_job(source.path())).await;

        assert!(matches!(
            run.outcome,
            JobOutcome::Failed { error: Error::Timeout(_), .. }
        ));
        assert!(run.rollback.unwrap().is_clean());
        assert!(!remote_has_branch(&bare, "submission/11"));

        // Nothing lands late either.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!remote_has_branch(&bare, "submission/11"));
    }

    #[tokio::test]
    async fn test_push_requires_generated_assets() {
        let publisher = GitPublisher::from_settings(settings("/nonexistent"));
        let mut job = prepared_job(Path::new("/nonexistent/src"));
        job.properties = Default::default();
        job.properties.insert("archive.path", "/nonexistent/src");

        let err = publisher.push(job).await.unwrap_err();
        assert_eq!(err, Error::MissingProperty("assets.manifest".to_string()));
    }
}
