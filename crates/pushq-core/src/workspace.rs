//! Job-scoped filesystem locations.

use std::path::{Path, PathBuf};

use crate::JobId;

/// Directory under the work root that holds per-job key material.
pub const KEYS_DIR: &str = "keys";

/// The two directories a job may create: the download/working directory and
/// the directory holding key material for the push.
///
/// Both are derived from the job id, so no two jobs share a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    pub download_dir: PathBuf,
    pub keys_dir: PathBuf,
}

impl JobWorkspace {
    /// `<root>/<id>` and `<root>/keys/<id>`.
    pub fn new(root: &Path, job_id: &JobId) -> Self {
        Self {
            download_dir: root.join(job_id.as_str()),
            keys_dir: root.join(KEYS_DIR).join(job_id.as_str()),
        }
    }

    /// Where the source archive is unpacked.
    pub fn source_dir(&self) -> PathBuf {
        self.download_dir.join("src")
    }

    pub fn paths(&self) -> [&Path; 2] {
        [&self.download_dir, &self.keys_dir]
    }
}
