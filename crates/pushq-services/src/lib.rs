//! Collaborators plugged into the pushq submit pipeline.
//!
//! - [`HttpArchiveSource`] downloads and unpacks the source archive.
//! - [`PropertyWriter`] enriches the job record and writes the manifest.
//! - [`GitPublisher`] pushes the prepared tree and deletes the branch on rollback.
//! - [`HttpMailer`] and [`LogMailer`] notify the job owner.
//!
//! [`Runtime`] wires them, the transport and the event sinks together from a
//! [`pushq_config::SystemConfig`].

pub mod archive;
pub mod git;
pub mod mail;
pub mod properties;
pub mod runtime;

pub use archive::{ArchiveError, HttpArchiveSource};
pub use git::{GitError, GitPublisher};
pub use mail::{HttpMailer, LogMailer, MailError};
pub use properties::{MANIFEST_FILE, PropertyWriter};
pub use runtime::{Runtime, RuntimeError, submit_collaborators};
