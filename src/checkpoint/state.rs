//! Checkpoint persistence for resumable batches.
//!
//! - The checkpoint is one decimal integer: the index of the next item
//! - It only ever holds the count of fully attempted items (a forced
//!   `--from` past it counts the skipped items as done)
//! - Writes are atomic (write temp, fsync, rename)
//! - A missing or corrupt file means a fresh start at 0

use crate::models::{BatchError, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, info, warn};

/// Checkpoint manager for loading and persisting the resume index.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    /// Path to the checkpoint file
    path: PathBuf,
    /// Sibling temp file used for atomic replacement
    temp_path: PathBuf,
}

impl CheckpointManager {
    /// Create a checkpoint manager for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut temp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        temp_name.push(".tmp");
        let temp_path = path.with_file_name(temp_name);

        Self { path, temp_path }
    }

    /// Check if a checkpoint exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the resume index.
    ///
    /// Absent, unreadable or unparseable files yield 0.
    pub fn load(&self) -> usize {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No checkpoint, starting from the beginning");
                return 0;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable checkpoint, starting from 0");
                return 0;
            }
        };

        match content.trim().parse::<usize>() {
            Ok(index) => {
                info!(index, "Resuming from checkpoint");
                index
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    content = content.trim(),
                    error = %e,
                    "Corrupt checkpoint, starting from 0"
                );
                0
            }
        }
    }

    /// Persist `index` as the new checkpoint (atomic write).
    pub async fn save(&self, index: usize) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BatchError::checkpoint_io("creating checkpoint dir", e))?;
        }

        // Write to temp file
        let mut file = tokio::fs::File::create(&self.temp_path)
            .await
            .map_err(|e| BatchError::checkpoint_io("creating temp checkpoint", e))?;
        file.write_all(index.to_string().as_bytes())
            .await
            .map_err(|e| BatchError::checkpoint_io("writing temp checkpoint", e))?;
        file.sync_all()
            .await
            .map_err(|e| BatchError::checkpoint_io("syncing temp checkpoint", e))?;
        drop(file);

        // Atomic rename
        tokio::fs::rename(&self.temp_path, &self.path)
            .await
            .map_err(|e| BatchError::checkpoint_io("renaming checkpoint", e))?;

        debug!(index, "Checkpoint saved");
        Ok(())
    }

    /// Get checkpoint path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_checkpoint_is_zero() {
        let temp_dir = TempDir::new().unwrap();
        let mgr = CheckpointManager::new(temp_dir.path().join("progress"));
        assert!(!mgr.exists());
        assert_eq!(mgr.load(), 0);
    }

    #[test]
    fn test_corrupt_checkpoint_is_zero() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("progress");
        std::fs::write(&path, "not a number").unwrap();
        assert_eq!(CheckpointManager::new(&path).load(), 0);

        std::fs::write(&path, "-4").unwrap();
        assert_eq!(CheckpointManager::new(&path).load(), 0);

        std::fs::write(&path, "").unwrap();
        assert_eq!(CheckpointManager::new(&path).load(), 0);
    }

    #[test]
    fn test_load_tolerates_whitespace() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("progress");
        std::fs::write(&path, "17\n").unwrap();
        assert_eq!(CheckpointManager::new(&path).load(), 17);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let mgr = CheckpointManager::new(temp_dir.path().join("state").join("progress"));

        mgr.save(1).await.unwrap();
        assert_eq!(mgr.load(), 1);

        mgr.save(2).await.unwrap();
        assert_eq!(mgr.load(), 2);
        assert_eq!(std::fs::read_to_string(mgr.path()).unwrap(), "2");

        // No temp file left behind
        assert!(!temp_dir.path().join("state").join("progress.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_into_missing_dir_fails_when_blocked() {
        let temp_dir = TempDir::new().unwrap();
        // A file where the parent directory should be
        let blocker = temp_dir.path().join("blocked");
        std::fs::write(&blocker, "").unwrap();

        let mgr = CheckpointManager::new(blocker.join("progress"));
        let err = mgr.save(3).await.unwrap_err();
        assert!(matches!(err, BatchError::CheckpointIo { .. }));
    }
}
