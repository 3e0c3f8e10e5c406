//! Configuration for pushq.
//!
//! This crate handles:
//! - The optional `pushq.kdl` worker configuration file
//! - Environment overrides applied on top of it
//! - Parsing the queue connection URL

pub mod endpoint;
pub mod error;
pub mod system;

pub use endpoint::{QueueBackend, QueueEndpoint};
pub use error::{ConfigError, ConfigResult};
pub use system::{
    GitHubSettings, MailSettings, QUEUE_URL_ENV, SystemConfig, WorkerSettings, parse_system_config,
};
