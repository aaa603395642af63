//! Per-user scratch directories
//!
//! Every user gets a private directory under the temp root where uploads
//! and detector output are staged. The whole root is wiped on startup.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

/// File name prefix of uploads staged for detection
pub const UPLOAD_PREFIX: &str = "upload-";

/// Errors that abort preparation of a scratch directory
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The directory could not be created
    #[error("cannot create scratch directory {path}: {source}")]
    Create {
        /// Directory that was being created
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

/// Summary of a scratch directory cleanup
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    /// Files deleted
    pub removed: usize,
    /// Files (or listings) that could not be deleted
    pub failed: usize,
}

/// Manager of the temp root and the scratch directories below it
#[derive(Debug, Clone)]
pub struct TempWorkspace {
    root: PathBuf,
}

impl TempWorkspace {
    /// Creates a manager rooted at `root`. Does not touch the filesystem.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Temp root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Picks a fresh, never shared scratch directory path for a user.
    #[must_use]
    pub fn allocate(&self, user_id: i64) -> PathBuf {
        self.root.join(format!("{user_id}-{}", Uuid::new_v4().simple()))
    }

    /// Deletes and recreates the temp root.
    ///
    /// Failures are logged and swallowed: a dirty or missing root must not
    /// keep the bot from starting.
    pub async fn purge_root(&self) {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => info!("Temp directory {} purged", self.root.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to purge temp directory {}: {e}", self.root.display()),
        }
        if let Err(e) = fs::create_dir_all(&self.root).await {
            warn!("Failed to create temp directory {}: {e}", self.root.display());
        }
    }

    /// Makes sure `scratch_dir` exists and holds no files from a previous run.
    ///
    /// Subdirectories are left alone. Deletion failures are logged and
    /// reported in the returned [`CleanupReport`] only.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Create`] if the directory cannot be created.
    pub async fn prepare(&self, scratch_dir: &Path) -> Result<CleanupReport, WorkspaceError> {
        fs::create_dir_all(scratch_dir)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: scratch_dir.to_path_buf(),
                source,
            })?;
        Ok(clear_files(scratch_dir).await)
    }
}

/// Deletes the regular files directly inside `dir`.
pub async fn clear_files(dir: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Raise error on temp files listing in {}: {e}", dir.display());
            report.failed += 1;
            return report;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Raise error on temp files listing in {}: {e}", dir.display());
                report.failed += 1;
                break;
            }
        };

        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        if is_dir {
            continue;
        }

        let path = entry.path();
        match fs::remove_file(&path).await {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!("Raise error on temp file delete {}: {e}", path.display());
                report.failed += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_prepare_creates_missing_dir() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let workspace = TempWorkspace::new(tmp.path());
        let scratch = workspace.allocate(1);
        assert!(!scratch.exists());

        let report = workspace.prepare(&scratch).await?;
        assert!(scratch.is_dir());
        assert_eq!(report, CleanupReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_prepare_removes_files_keeps_subdirs() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let workspace = TempWorkspace::new(tmp.path());
        let scratch = workspace.allocate(1);
        std::fs::create_dir_all(scratch.join("nested"))?;
        std::fs::write(scratch.join("old.jpg"), b"old")?;
        std::fs::write(scratch.join("older.jpg"), b"older")?;
        std::fs::write(scratch.join("nested").join("keep.txt"), b"keep")?;

        let report = workspace.prepare(&scratch).await?;
        assert_eq!(report.removed, 2);
        assert_eq!(report.failed, 0);
        assert!(!scratch.join("old.jpg").exists());
        assert!(scratch.join("nested").join("keep.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_prepare_fails_when_path_is_a_file() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let workspace = TempWorkspace::new(tmp.path());
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"x")?;

        let result = workspace.prepare(&blocker.join("scratch")).await;
        assert!(matches!(result, Err(WorkspaceError::Create { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_files_reports_unreadable_dir() {
        let report = clear_files(Path::new("/definitely/not/here")).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.removed, 0);
    }

    #[tokio::test]
    async fn test_purge_root_wipes_tree() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path().join("tmp");
        let workspace = TempWorkspace::new(&root);
        let scratch = workspace.allocate(3);
        std::fs::create_dir_all(scratch.join("deep"))?;
        std::fs::write(scratch.join("deep").join("a.jpg"), b"a")?;

        workspace.purge_root().await;
        assert!(root.is_dir());
        assert_eq!(std::fs::read_dir(&root)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_root_missing_root_is_created() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path().join("never-created");
        TempWorkspace::new(&root).purge_root().await;
        assert!(root.is_dir());
        Ok(())
    }
}
