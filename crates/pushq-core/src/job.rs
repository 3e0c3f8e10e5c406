//! Job records and payloads.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::{Error, JobId, Result};

/// Which pipeline a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    #[display("submit")]
    Submit,
    #[display("test")]
    Test,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Submit => "submit",
            JobKind::Test => "test",
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "submit" => Ok(JobKind::Submit),
            "test" => Ok(JobKind::Test),
            other => Err(Error::InvalidInput(format!("unknown job kind: {other}"))),
        }
    }
}

/// Payload of a submit job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitPayload {
    /// Where the source archive is fetched from.
    pub source_url: String,
    /// Target repository on the remote host, as `owner/name`.
    pub repository: String,
    /// Address notified about the outcome.
    pub owner_email: String,
    /// Free-form build parameters.
    #[serde(default)]
    pub build: HashMap<String, Value>,
}

/// Properties accumulated by pipeline stages.
///
/// Entries are only ever added; a stage never removes what an earlier stage wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, Value>);

impl Properties {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a property that an earlier stage must have written.
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.0
            .get(key)
            .ok_or_else(|| Error::MissingProperty(key.to_string()))
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| Error::MissingProperty(format!("{key} (expected a string)")))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Keys starting with `prefix`, in order.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a Value)> {
        self.0
            .iter()
            .filter(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A unit of work travelling through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    /// Opaque caller-supplied data; see [`SubmitPayload`] for submit jobs.
    pub payload: Value,
    #[serde(default)]
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: JobId, kind: JobKind, payload: Value) -> Self {
        Self {
            id,
            kind,
            payload,
            properties: Properties::default(),
            created_at: Utc::now(),
        }
    }

    pub fn submit(id: JobId, payload: &SubmitPayload) -> Result<Self> {
        Ok(Self::new(id, JobKind::Submit, serde_json::to_value(payload)?))
    }

    pub fn test(id: JobId) -> Self {
        Self::new(id, JobKind::Test, Value::Null)
    }

    /// Decode the payload into a typed structure.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| Error::InvalidInput(format!("payload of job {}: {}", self.id, e)))
    }

    pub fn submit_payload(&self) -> Result<SubmitPayload> {
        self.payload_as()
    }

    /// Label used in log lines: the job id, or `test` for diagnostic jobs.
    pub fn log_label(&self) -> String {
        match self.kind {
            JobKind::Submit => format!("job-{}", self.id),
            JobKind::Test => "test".to_string(),
        }
    }
}
