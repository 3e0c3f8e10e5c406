//! Core domain types and traits for the pushq job queue.
//!
//! This crate contains:
//! - Job identifiers, records and payloads
//! - Lifecycle events published for every job
//! - Job-scoped workspace paths
//! - Collaborator traits consumed by the pipeline (stages, rollback, notifications)

pub mod error;
pub mod event;
pub mod id;
pub mod job;
pub mod stage;
pub mod workspace;

pub use error::{Error, Result};
pub use event::{JobEvent, JobEventKind};
pub use id::JobId;
pub use job::{JobKind, JobRecord, Properties, SubmitPayload};
pub use workspace::JobWorkspace;
