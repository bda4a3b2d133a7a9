//! Per-job working directory with exactly-once removal.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use super::ArtifactError;
use crate::job::JobId;

/// Scoped working directory of one job.
///
/// Created before the engine starts and removed exactly once: by an
/// explicit [`release`](Self::release) on the normal and failure paths, or
/// by `Drop` when the owner disappears first (task abort, caller
/// disconnect). Removal failures are logged and never returned as errors;
/// a failed removal leaves the directory unreleased so `Drop` tries again.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    released: AtomicBool,
}

impl WorkDir {
    /// Creates `<root>/job-<id>`. Fails if the directory already exists.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] when the root or the job directory
    /// cannot be created.
    pub async fn create(root: &Path, job_id: &JobId) -> Result<Self, ArtifactError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| ArtifactError::io(root, e))?;
        let path = root.join(format!("job-{job_id}"));
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| ArtifactError::io(&path, e))?;
        debug!(path = %path.display(), "working directory created");
        Ok(Self {
            path,
            released: AtomicBool::new(false),
        })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Deletes everything inside the directory, keeping the directory.
    ///
    /// Used between attempts so a retry never sees partial files.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] when an entry cannot be removed.
    pub async fn clear(&self) -> Result<(), ArtifactError> {
        let mut entries = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| ArtifactError::io(&self.path, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ArtifactError::io(&self.path, e))?
        {
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| ArtifactError::io(&path, e))?
                .is_dir();
            let result = if is_dir {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            result.map_err(|e| ArtifactError::io(&path, e))?;
        }
        Ok(())
    }

    /// Removes the directory. Only the first successful call does any work.
    ///
    /// Returns `true` when this call removed the directory. A failed
    /// removal returns `false` and leaves the directory unreleased.
    pub async fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "working directory removed");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove working directory");
                self.released.store(false, Ordering::Release);
                false
            }
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if *self.released.get_mut() {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "working directory removed on drop"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove working directory on drop"),
        }
    }
}
