//! Feedback archive
//!
//! Keeps the image a user complained about together with the complaint:
//! `<root>/<user_id>/<name>.jpg` next to `<root>/<user_id>/<name>.txt`.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::workspace::UPLOAD_PREFIX;

/// Extensions recognised as inspection images when scanning a scratch dir
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Errors raised while archiving feedback
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Filesystem operation failed
    #[error("{action} {path}: {source}")]
    Io {
        /// What was being done
        action: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    fn io<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Files written for one archived feedback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFeedback {
    /// Archived inspection image
    pub image: PathBuf,
    /// Feedback text file
    pub text: PathBuf,
}

/// Per-user feedback archive
#[derive(Debug, Clone)]
pub struct FeedbackArchive {
    root: PathBuf,
}

impl FeedbackArchive {
    /// Creates an archive rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Archive directory of one user
    #[must_use]
    pub fn user_dir(&self, user_id: i64) -> PathBuf {
        self.root.join(user_id.to_string())
    }

    /// Moves the last inspection image out of `scratch_dir` and stores `text`
    /// beside it.
    ///
    /// `artifact` is preferred when it still exists; otherwise the first image
    /// in `scratch_dir` (by file name) is used. Returns `Ok(None)` when there
    /// is no image to archive.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if creating the user directory, moving the image
    /// or writing the text fails.
    pub async fn archive(
        &self,
        user_id: i64,
        text: &str,
        scratch_dir: &Path,
        artifact: Option<&Path>,
    ) -> Result<Option<ArchivedFeedback>, ArchiveError> {
        let Some(image) = locate_image(scratch_dir, artifact).await else {
            debug!(user_id, "No inspection image to archive");
            return Ok(None);
        };
        let Some(file_name) = image.file_name() else {
            return Ok(None);
        };

        let user_dir = self.user_dir(user_id);
        fs::create_dir_all(&user_dir)
            .await
            .map_err(ArchiveError::io("create", &user_dir))?;

        let archived_image = user_dir.join(file_name);
        move_file(&image, &archived_image).await?;

        let text_path = archived_image.with_extension("txt");
        fs::write(&text_path, text)
            .await
            .map_err(ArchiveError::io("write", &text_path))?;

        info!(user_id, image = %archived_image.display(), "Feedback archived");
        Ok(Some(ArchivedFeedback {
            image: archived_image,
            text: text_path,
        }))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

fn is_staged_upload(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(UPLOAD_PREFIX))
}

async fn locate_image(scratch_dir: &Path, artifact: Option<&Path>) -> Option<PathBuf> {
    if let Some(artifact) = artifact {
        let is_file = fs::metadata(artifact).await.is_ok_and(|m| m.is_file());
        if artifact.starts_with(scratch_dir) && is_file {
            return Some(artifact.to_path_buf());
        }
    }

    let mut entries = fs::read_dir(scratch_dir).await.ok()?;
    let mut images = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !is_image(&path) || is_staged_upload(&path) {
            continue;
        }
        if entry.file_type().await.is_ok_and(|t| t.is_file()) {
            images.push(path);
        }
    }
    images.sort();
    images.into_iter().next()
}

async fn move_file(from: &Path, to: &Path) -> Result<(), ArchiveError> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    // Scratch and archive roots may live on different filesystems
    fs::copy(from, to)
        .await
        .map_err(ArchiveError::io("copy", from))?;
    fs::remove_file(from)
        .await
        .map_err(ArchiveError::io("remove", from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        scratch: PathBuf,
        archive: FeedbackArchive,
    }

    fn fixture() -> anyhow::Result<Fixture> {
        let tmp = TempDir::new()?;
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir_all(&scratch)?;
        let archive = FeedbackArchive::new(tmp.path().join("users_data"));
        Ok(Fixture {
            _tmp: tmp,
            scratch,
            archive,
        })
    }

    #[tokio::test]
    async fn test_archive_single_image() -> anyhow::Result<()> {
        let f = fixture()?;
        std::fs::write(f.scratch.join("abc.jpg"), b"jpeg")?;

        let archived = f.archive.archive(77, "bad crop", &f.scratch, None).await?;
        let archived = archived.ok_or_else(|| anyhow::anyhow!("nothing archived"))?;

        let user_dir = f.archive.user_dir(77);
        assert_eq!(archived.image, user_dir.join("abc.jpg"));
        assert_eq!(archived.text, user_dir.join("abc.txt"));
        assert_eq!(std::fs::read_to_string(&archived.text)?, "bad crop");
        assert_eq!(std::fs::read(&archived.image)?, b"jpeg");
        assert_eq!(std::fs::read_dir(&user_dir)?.count(), 2);
        assert!(!f.scratch.join("abc.jpg").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_no_image_is_noop() -> anyhow::Result<()> {
        let f = fixture()?;
        std::fs::write(f.scratch.join("notes.txt"), b"x")?;

        let archived = f.archive.archive(1, "text", &f.scratch, None).await?;
        assert!(archived.is_none());
        assert!(!f.archive.user_dir(1).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_scratch_dir_is_noop() -> anyhow::Result<()> {
        let f = fixture()?;
        let archived = f
            .archive
            .archive(1, "text", &f.scratch.join("gone"), None)
            .await?;
        assert!(archived.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_explicit_artifact_wins_over_scan() -> anyhow::Result<()> {
        let f = fixture()?;
        std::fs::write(f.scratch.join("a-upload.jpg"), b"source")?;
        let artifact = f.scratch.join("z-result.jpg");
        std::fs::write(&artifact, b"annotated")?;

        let archived = f
            .archive
            .archive(2, "wrong class", &f.scratch, Some(&artifact))
            .await?
            .ok_or_else(|| anyhow::anyhow!("nothing archived"))?;
        assert_eq!(std::fs::read(&archived.image)?, b"annotated");
        // Only one image leaves the scratch dir
        assert!(f.scratch.join("a-upload.jpg").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_artifact_falls_back_to_first_image() -> anyhow::Result<()> {
        let f = fixture()?;
        std::fs::write(f.scratch.join("b.png"), b"b")?;
        std::fs::write(f.scratch.join("a.JPG"), b"a")?;

        let archived = f
            .archive
            .archive(3, "fb", &f.scratch, Some(&f.scratch.join("deleted.jpg")))
            .await?
            .ok_or_else(|| anyhow::anyhow!("nothing archived"))?;
        assert_eq!(archived.image.file_name().and_then(|n| n.to_str()), Some("a.JPG"));
        assert!(f.scratch.join("b.png").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_staged_upload_is_never_archived() -> anyhow::Result<()> {
        let f = fixture()?;
        std::fs::write(f.scratch.join("upload-0a1b.jpg"), b"RAW-PHOTO")?;

        let archived = f.archive.archive(4, "fb", &f.scratch, None).await?;
        assert!(archived.is_none());
        assert!(f.scratch.join("upload-0a1b.jpg").exists());
        Ok(())
    }
}
