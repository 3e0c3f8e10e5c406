//! Removal of job-scoped directories.

use pushq_core::{JobId, JobWorkspace};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Removes the temporary state of a job. Must be idempotent.
pub trait Sweeper: Send + Sync {
    fn cleanup(&self, job_id: &JobId);
}

/// Deletes `<root>/<id>` and `<root>/keys/<id>`.
#[derive(Debug, Clone)]
pub struct CleanupSweeper {
    root: PathBuf,
}

impl CleanupSweeper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workspace(&self, job_id: &JobId) -> JobWorkspace {
        JobWorkspace::new(&self.root, job_id)
    }
}

impl Sweeper for CleanupSweeper {
    fn cleanup(&self, job_id: &JobId) {
        for path in self.workspace(job_id).paths() {
            match std::fs::remove_dir_all(path) {
                Ok(()) => debug!(job_id = %job_id, path = %path.display(), "Removed job directory"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(job_id = %job_id, path = %path.display(), error = %e, "Failed to remove job directory");
                }
            }
        }
    }
}

/// Guarantees one cleanup per job.
///
/// Released explicitly at the end of processing; if the processing future is
/// dropped or panics first, the guard sweeps on drop.
pub struct WorkspaceGuard {
    job_id: JobId,
    sweeper: Arc<dyn Sweeper>,
    released: bool,
}

impl WorkspaceGuard {
    pub fn acquire(sweeper: Arc<dyn Sweeper>, job_id: JobId) -> Self {
        Self {
            job_id,
            sweeper,
            released: false,
        }
    }

    pub fn release(mut self) {
        self.sweep();
    }

    fn sweep(&mut self) {
        if !self.released {
            self.released = true;
            self.sweeper.cleanup(&self.job_id);
        }
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        self.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSweeper(AtomicUsize);

    impl Sweeper for CountingSweeper {
        fn cleanup(&self, _job_id: &JobId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cleanup_removes_both_directories() {
        let root = tempfile::tempdir().unwrap();
        let sweeper = CleanupSweeper::new(root.path());
        let ws = sweeper.workspace(&JobId::from(42));
        std::fs::create_dir_all(ws.source_dir()).unwrap();
        std::fs::write(ws.source_dir().join("main.rs"), "fn main() {}").unwrap();
        std::fs::create_dir_all(&ws.keys_dir).unwrap();
        std::fs::write(ws.keys_dir.join("id_ed25519"), "secret").unwrap();

        sweeper.cleanup(&JobId::from(42));

        assert!(!ws.download_dir.exists());
        assert!(!ws.keys_dir.exists());
        assert!(root.path().join("keys").exists());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let sweeper = CleanupSweeper::new(root.path());
        let ws = sweeper.workspace(&JobId::from(7));
        std::fs::create_dir_all(&ws.download_dir).unwrap();

        sweeper.cleanup(&JobId::from(7));
        sweeper.cleanup(&JobId::from(7));

        assert!(!ws.download_dir.exists());
    }

    #[test]
    fn test_cleanup_leaves_other_jobs_alone() {
        let root = tempfile::tempdir().unwrap();
        let sweeper = CleanupSweeper::new(root.path());
        let other = sweeper.workspace(&JobId::from(2));
        std::fs::create_dir_all(&other.download_dir).unwrap();

        sweeper.cleanup(&JobId::from(1));

        assert!(other.download_dir.exists());
    }

    #[test]
    fn test_cleanup_keeps_other_jobs_keys() {
        let root = tempfile::tempdir().unwrap();
        let sweeper = CleanupSweeper::new(root.path());
        let other = sweeper.workspace(&JobId::from(42));
        std::fs::create_dir_all(&other.keys_dir).unwrap();
        std::fs::write(other.keys_dir.join("id_ed25519"), "secret").unwrap();

        // The shared keys directory can never be named as a job.
        assert!(JobId::parse("keys").is_err());
        for id in ["7", "keys-7", "Keys.1"] {
            sweeper.cleanup(&JobId::parse(id).unwrap());
        }

        assert!(other.keys_dir.join("id_ed25519").exists());
    }

    #[test]
    fn test_guard_sweeps_once_on_release() {
        let sweeper = Arc::new(CountingSweeper::default());
        let guard = WorkspaceGuard::acquire(sweeper.clone(), JobId::from(1));
        guard.release();
        assert_eq!(sweeper.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_sweeps_on_drop() {
        let sweeper = Arc::new(CountingSweeper::default());
        {
            let _guard = WorkspaceGuard::acquire(sweeper.clone(), JobId::from(1));
        }
        assert_eq!(sweeper.0.load(Ordering::SeqCst), 1);
    }
}
