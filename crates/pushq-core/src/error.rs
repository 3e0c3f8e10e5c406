//! Error types for pushq.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by pipeline stages and their collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("missing property: {0}")]
    MissingProperty(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("rollback failed: {0}")]
    Rollback(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
