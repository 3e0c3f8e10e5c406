//! Job identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::workspace::KEYS_DIR;
use crate::{Error, Result};

static VALID_ID: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9_.-]{1,128}$").expect("valid regex"));

/// Identifier of a job, assigned by the submitter.
///
/// The id is the correlation key for log lines, rollback calls and the
/// job-scoped directories, so it must be usable as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Parse and validate a caller-supplied id.
    ///
    /// The name of the shared keys directory is reserved: a job with that id
    /// would own every other job's key directory.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if !VALID_ID.is_match(&value) || value == "." || value.contains("..") {
            return Err(Error::InvalidInput(format!("invalid job id: {value:?}")));
        }
        if value.eq_ignore_ascii_case(KEYS_DIR) {
            return Err(Error::InvalidInput(format!("job id {value:?} is reserved")));
        }
        Ok(Self(value))
    }

    /// Generate a fresh time-ordered id for callers that don't supply one.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
