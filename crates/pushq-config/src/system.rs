//! Worker configuration: `pushq.kdl` plus environment overrides.

use crate::{ConfigError, ConfigResult, QueueEndpoint};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the queue connection URL.
pub const QUEUE_URL_ENV: &str = "QUEUE_URL";

/// Process-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Queue transport to connect to.
    pub queue: QueueEndpoint,
    /// Worker pool settings.
    pub worker: WorkerSettings,
    /// Root under which job-scoped directories are created. Owned by pushq:
    /// cleanup deletes `<root>/<id>` for every job id.
    pub work_root: PathBuf,
    pub github: GitHubSettings,
    pub mail: MailSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Number of jobs processed concurrently by one process.
    pub concurrency: usize,
    /// Delay between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Upper bound on one job's pipeline run.
    pub job_timeout: Duration,
    /// Claims older than this are handed back to the queue.
    pub visibility_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(15 * 60),
            visibility_timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSettings {
    /// Base URL repositories are pushed to.
    pub remote: String,
    /// Name of the environment variable holding the push token.
    pub token_env: String,
    /// Prefix of the branch created for each job.
    pub branch_prefix: String,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            remote: "https://github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            branch_prefix: "submission/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailSettings {
    /// HTTP endpoint of the transactional mail service. Notifications are
    /// only logged when unset.
    pub endpoint: Option<String>,
    pub from: Option<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            queue: QueueEndpoint::default(),
            worker: WorkerSettings::default(),
            work_root: std::env::temp_dir().join("pushq"),
            github: GitHubSettings::default(),
            mail: MailSettings::default(),
        }
    }
}

impl SystemConfig {
    /// Load the config file when given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => parse_system_config(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `QUEUE_URL`, `PUSHQ_WORK_ROOT`, `PUSHQ_CONCURRENCY` and
    /// `PUSHQ_JOB_TIMEOUT_SECS` from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(QUEUE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.queue = QueueEndpoint::parse(raw.trim())?;
        }
        if let Some(root) = lookup("PUSHQ_WORK_ROOT").filter(|v| !v.is_empty()) {
            self.work_root = PathBuf::from(root);
        }
        if let Some(raw) = lookup("PUSHQ_CONCURRENCY") {
            self.worker.concurrency = parse_positive("PUSHQ_CONCURRENCY", &raw)? as usize;
        }
        if let Some(raw) = lookup("PUSHQ_JOB_TIMEOUT_SECS") {
            self.worker.job_timeout =
                Duration::from_secs(parse_positive("PUSHQ_JOB_TIMEOUT_SECS", &raw)?);
        }
        self.validate()
    }

    /// Check the settings that only make sense together.
    ///
    /// A claim must stay invisible for longer than a job may run, otherwise
    /// the reaper hands a live job to a second worker.
    pub fn validate(&self) -> ConfigResult<()> {
        let worker = &self.worker;
        if worker.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if worker.job_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "job timeout".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        if worker.visibility_timeout <= worker.job_timeout {
            return Err(ConfigError::InvalidValue {
                field: "visibility timeout".to_string(),
                message: format!(
                    "must exceed the job timeout ({}s <= {}s)",
                    worker.visibility_timeout.as_secs(),
                    worker.job_timeout.as_secs()
                ),
            });
        }
        Ok(())
    }
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "queue" => {
                let url = get_string_prop(node, "url")
                    .or_else(|| get_first_string_arg(node))
                    .ok_or_else(|| ConfigError::MissingField("queue url".to_string()))?;
                config.queue = QueueEndpoint::parse(&url)?;
            }
            "worker" => parse_worker(node, &mut config.worker)?,
            "workspace" => {
                if let Some(root) = get_string_prop(node, "root") {
                    config.work_root = PathBuf::from(root);
                }
            }
            "github" => {
                if let Some(remote) = get_string_prop(node, "remote") {
                    config.github.remote = remote.trim_end_matches('/').to_string();
                }
                if let Some(token_env) = get_string_prop(node, "token-env") {
                    config.github.token_env = token_env;
                }
                if let Some(prefix) = get_string_prop(node, "branch-prefix") {
                    config.github.branch_prefix = prefix;
                }
            }
            "mail" => {
                config.mail.endpoint = get_string_prop(node, "endpoint");
                config.mail.from = get_string_prop(node, "from");
            }
            _ => {} // Ignore unknown nodes
        }
    }

    config.validate()?;
    Ok(config)
}

fn parse_worker(node: &KdlNode, worker: &mut WorkerSettings) -> ConfigResult<()> {
    if let Some(n) = get_u64_prop(node, "concurrency")? {
        worker.concurrency = n as usize;
    }
    if let Some(ms) = get_u64_prop(node, "poll-interval-ms")? {
        worker.poll_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = get_u64_prop(node, "job-timeout-secs")? {
        worker.job_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = get_u64_prop(node, "visibility-timeout-secs")? {
        worker.visibility_timeout = Duration::from_secs(secs);
    }
    Ok(())
}

fn parse_positive(field: &str, raw: &str) -> ConfigResult<u64> {
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a positive integer, got '{raw}'"),
        }),
    }
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_u64_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    value
        .as_integer()
        .and_then(|n| u64::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("expected a non-negative integer, got {value}"),
        })
}
