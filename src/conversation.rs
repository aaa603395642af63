//! Conversation handler
//!
//! Drives one user's photo → detection → feedback cycle. Returns typed
//! outcomes; turning them into chat messages is the transport's job.

use crate::archive::FeedbackArchive;
use crate::detection::{DetectionError, Detector};
use crate::session::{ConversationState, RateLimitPolicy, SessionRegistry};
use crate::workspace::{TempWorkspace, WorkspaceError, UPLOAD_PREFIX};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Broad category of a failed inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The uploaded image could not be retrieved
    Fetch,
    /// Scratch directory could not be prepared
    Workspace,
    /// The detector failed or timed out
    Detection,
    /// The detector's output could not be read back
    Output,
}

/// Errors of a single inspection request
#[derive(Debug, Error)]
pub enum InspectionError {
    /// Downloading the image failed
    #[error("fetch failed: {0}")]
    Fetch(#[source] anyhow::Error),
    /// Preparing the scratch directory failed
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// Writing the upload into the scratch directory failed
    #[error("cannot stage upload {path}: {source}")]
    Stage {
        /// Target path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The detector failed
    #[error(transparent)]
    Detection(#[from] DetectionError),
    /// The annotated image is missing
    #[error("annotated image {0} is missing")]
    Output(PathBuf),
}

impl InspectionError {
    /// Category used for user-facing reporting
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Fetch(_) => FailureKind::Fetch,
            Self::Workspace(_) | Self::Stage { .. } => FailureKind::Workspace,
            Self::Detection(_) => FailureKind::Detection,
            Self::Output(_) => FailureKind::Output,
        }
    }
}

/// Uploaded image bytes plus the extension to stage them with
#[derive(Debug, Clone)]
pub struct Upload {
    /// Raw image bytes
    pub bytes: Vec<u8>,
    /// File extension without dot
    pub extension: String,
}

/// Successful inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionReport {
    /// Annotated image inside the user's scratch directory
    pub annotated_image: PathBuf,
    /// Detected labels in detector order
    pub labels: Vec<String>,
}

/// Outcome of a photo submission that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoOutcome {
    /// Too many photos in the current window; nothing was fetched
    RateLimited,
    /// Detection ran
    Inspected(InspectionReport),
}

/// Outcome of a free-text message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOutcome {
    /// Text was taken as feedback on the last diagnosis
    FeedbackSaved,
    /// Not awaiting feedback; the user should send a photo
    PromptForPhoto,
}

/// Handler owning the session registry and the filesystem collaborators
pub struct ConversationHandler {
    registry: SessionRegistry,
    workspace: TempWorkspace,
    archive: FeedbackArchive,
    detector: Arc<dyn Detector>,
    detector_timeout: Duration,
}

impl ConversationHandler {
    /// Creates a handler
    #[must_use]
    pub fn new(
        policy: RateLimitPolicy,
        workspace: TempWorkspace,
        archive: FeedbackArchive,
        detector: Arc<dyn Detector>,
        detector_timeout: Duration,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(policy, workspace.clone()),
            workspace,
            archive,
            detector,
            detector_timeout,
        }
    }

    /// Session registry
    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Handles a photo submitted by `user_id` at `now`.
    ///
    /// `fetch` downloads the image and is only called once the photo is
    /// admitted. A new photo cancels a pending feedback request. Counters are
    /// not rolled back on failure.
    ///
    /// # Errors
    ///
    /// Returns [`InspectionError`] if fetching, staging, detection or reading
    /// back the result fails.
    pub async fn submit_photo<F, Fut>(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
        fetch: F,
    ) -> Result<PhotoOutcome, InspectionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Upload>>,
    {
        let admission = self.registry.admit(user_id, now).await;
        self.registry.set_state(user_id, ConversationState::Idle).await;

        if !admission.allowed {
            info!(
                user_id,
                photo_count = admission.session.photo_count(),
                "User reached the photo limit"
            );
            return Ok(PhotoOutcome::RateLimited);
        }

        let upload = fetch().await.map_err(InspectionError::Fetch)?;

        let _guard = self.registry.lock_workspace(user_id).await;
        let scratch_dir = admission.session.scratch_dir;
        let cleanup = self.workspace.prepare(&scratch_dir).await?;
        // The previous result is gone from disk now
        self.registry.clear_artifact(user_id).await;
        if cleanup.failed > 0 {
            warn!(user_id, failed = cleanup.failed, "Scratch directory not fully cleared");
        }

        let source = stage_upload(&scratch_dir, &upload).await?;
        info!(user_id, source = %source.display(), "Photo staged for detection");

        let result = tokio::time::timeout(
            self.detector_timeout,
            self.detector.detect(&source, &scratch_dir),
        )
        .await
        .map_err(|_| DetectionError::Timeout(self.detector_timeout.as_secs()));

        if let Err(e) = tokio::fs::remove_file(&source).await {
            warn!(user_id, "Failed to remove staged upload {}: {e}", source.display());
        }
        let detection = result??;

        if !tokio::fs::try_exists(&detection.annotated_image)
            .await
            .unwrap_or(false)
        {
            return Err(InspectionError::Output(detection.annotated_image));
        }

        self.registry
            .record_artifact(user_id, detection.annotated_image.clone())
            .await;

        info!(user_id, labels = detection.labels.len(), "Detection finished");
        Ok(PhotoOutcome::Inspected(InspectionReport {
            annotated_image: detection.annotated_image,
            labels: detection.labels,
        }))
    }

    /// Switches the user into feedback collection.
    ///
    /// Returns `false` when the user has no session yet (no photo inspected).
    pub async fn request_feedback(&self, user_id: i64) -> bool {
        let accepted = self
            .registry
            .set_state(user_id, ConversationState::AwaitingFeedback)
            .await;
        if accepted {
            info!(user_id, "Awaiting feedback");
        }
        accepted
    }

    /// Handles a free-text message.
    ///
    /// Archival failures are logged and the feedback still counts as received.
    pub async fn submit_text(&self, user_id: i64, text: &str) -> TextOutcome {
        if text.trim().is_empty() {
            return TextOutcome::PromptForPhoto;
        }
        let Some(target) = self.registry.take_feedback_target(user_id).await else {
            return TextOutcome::PromptForPhoto;
        };

        let _guard = self.registry.lock_workspace(user_id).await;
        match self
            .archive
            .archive(
                user_id,
                text,
                &target.scratch_dir,
                target.last_artifact.as_deref(),
            )
            .await
        {
            Ok(Some(_)) => info!(user_id, "Feedback saved"),
            Ok(None) => info!(user_id, "Feedback received without an image to attach"),
            Err(e) => warn!(user_id, "Failed to archive feedback: {e}"),
        }
        TextOutcome::FeedbackSaved
    }
}

async fn stage_upload(scratch_dir: &Path, upload: &Upload) -> Result<PathBuf, InspectionError> {
    let path = scratch_dir.join(format!(
        "{UPLOAD_PREFIX}{}.{}",
        Uuid::new_v4().simple(),
        upload.extension
    ));
    tokio::fs::write(&path, &upload.bytes)
        .await
        .map_err(|source| InspectionError::Stage {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, MockDetector};
    use chrono::TimeDelta;
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    fn jpeg() -> Upload {
        Upload {
            bytes: b"jpeg".to_vec(),
            extension: "jpg".to_string(),
        }
    }

    fn handler(tmp: &TempDir, detector: MockDetector, max: u32) -> ConversationHandler {
        ConversationHandler::new(
            RateLimitPolicy::new(TimeDelta::minutes(10), max),
            TempWorkspace::new(tmp.path().join("tmp")),
            FeedbackArchive::new(tmp.path().join("users_data")),
            Arc::new(detector),
            Duration::from_secs(5),
        )
    }

    fn annotating_detector(labels: &'static [&'static str]) -> MockDetector {
        let mut mock = MockDetector::new();
        mock.expect_detect().returning(move |image, dir| {
            assert!(image.starts_with(dir));
            let annotated_image = dir.join("result.jpg");
            std::fs::write(&annotated_image, b"annotated")?;
            Ok(Detection {
                annotated_image,
                labels: labels.iter().map(ToString::to_string).collect(),
            })
        });
        mock
    }

    #[tokio::test]
    async fn test_photo_is_inspected() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let handler = handler(&tmp, annotating_detector(&["crack"]), 3);

        let outcome = handler.submit_photo(1, t0(), || async { Ok(jpeg()) }).await?;
        let report = match outcome {
            PhotoOutcome::Inspected(report) => report,
            PhotoOutcome::RateLimited => anyhow::bail!("unexpected rate limit"),
        };
        assert_eq!(report.labels, vec!["crack".to_string()]);
        assert!(report.annotated_image.exists());

        let session = handler
            .registry()
            .snapshot(1)
            .await
            .ok_or_else(|| anyhow::anyhow!("no session"))?;
        assert_eq!(session.last_artifact, Some(report.annotated_image));
        // Staged upload is gone, only the result stays
        assert_eq!(std::fs::read_dir(&session.scratch_dir)?.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_rate_limited_photo_skips_fetch_and_detection() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let mut mock = MockDetector::new();
        mock.expect_detect().times(1).returning(|_, dir| {
            let annotated_image = dir.join("r.jpg");
            std::fs::write(&annotated_image, b"x")?;
            Ok(Detection {
                annotated_image,
                labels: Vec::new(),
            })
        });
        let handler = handler(&tmp, mock, 1);

        handler.submit_photo(1, t0(), || async { Ok(jpeg()) }).await?;
        let outcome = handler
            .submit_photo(1, t0() + TimeDelta::minutes(1), || async {
                anyhow::bail!("fetch must not run")
            })
            .await?;
        assert_eq!(outcome, PhotoOutcome::RateLimited);
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_failure_is_typed() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let mut mock = MockDetector::new();
        mock.expect_detect().never();
        let handler = handler(&tmp, mock, 3);

        let err = handler
            .submit_photo(1, t0(), || async { anyhow::bail!("telegram down") })
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert_eq!(err.kind(), FailureKind::Fetch);

        // Fail open: the attempt still counted
        let session = handler.registry().snapshot(1).await;
        assert_eq!(session.map(|s| s.photo_count()), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_detection_failure_and_missing_output() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let mut mock = MockDetector::new();
        let mut calls = 0;
        mock.expect_detect().times(2).returning(move |_, dir| {
            calls += 1;
            if calls == 1 {
                Err(DetectionError::Api("500: model crashed".to_string()))
            } else {
                Ok(Detection {
                    annotated_image: dir.join("never-written.jpg"),
                    labels: Vec::new(),
                })
            }
        });
        let handler = handler(&tmp, mock, 5);

        let first = handler.submit_photo(1, t0(), || async { Ok(jpeg()) }).await;
        assert!(matches!(first, Err(ref e) if e.kind() == FailureKind::Detection));

        let second = handler.submit_photo(1, t0(), || async { Ok(jpeg()) }).await;
        assert!(matches!(second, Err(InspectionError::Output(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_feedback_flow() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let handler = handler(&tmp, annotating_detector(&[]), 3);

        assert!(!handler.request_feedback(9).await);
        assert_eq!(handler.submit_text(9, "hello").await, TextOutcome::PromptForPhoto);

        handler.submit_photo(9, t0(), || async { Ok(jpeg()) }).await?;
        assert!(handler.request_feedback(9).await);
        assert_eq!(handler.submit_text(9, "   ").await, TextOutcome::PromptForPhoto);
        assert_eq!(handler.submit_text(9, "bad crop").await, TextOutcome::FeedbackSaved);

        let archived = tmp.path().join("users_data").join("9");
        assert_eq!(std::fs::read_to_string(archived.join("result.txt"))?, "bad crop");
        assert!(archived.join("result.jpg").exists());

        // Back to idle
        assert_eq!(handler.submit_text(9, "more").await, TextOutcome::PromptForPhoto);
        Ok(())
    }

    #[tokio::test]
    async fn test_new_photo_cancels_feedback_request() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let handler = handler(&tmp, annotating_detector(&[]), 1);

        handler.submit_photo(4, t0(), || async { Ok(jpeg()) }).await?;
        assert!(handler.request_feedback(4).await);

        // Even a rate-limited photo resets the flag
        let outcome = handler.submit_photo(4, t0(), || async { Ok(jpeg()) }).await?;
        assert_eq!(outcome, PhotoOutcome::RateLimited);
        assert_eq!(handler.submit_text(4, "late").await, TextOutcome::PromptForPhoto);
        Ok(())
    }

    #[tokio::test]
    async fn test_detector_timeout() -> anyhow::Result<()> {
        struct Slow;

        #[async_trait::async_trait]
        impl Detector for Slow {
            async fn detect(&self, _: &Path, _: &Path) -> Result<Detection, DetectionError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(DetectionError::Api("unreachable".to_string()))
            }
        }

        let tmp = TempDir::new()?;
        let handler = ConversationHandler::new(
            RateLimitPolicy::new(TimeDelta::minutes(10), 3),
            TempWorkspace::new(tmp.path().join("tmp")),
            FeedbackArchive::new(tmp.path().join("users_data")),
            Arc::new(Slow),
            Duration::from_millis(50),
        );

        let result = handler.submit_photo(1, t0(), || async { Ok(jpeg()) }).await;
        assert!(matches!(
            result,
            Err(InspectionError::Detection(DetectionError::Timeout(_)))
        ));

        let session = handler
            .registry()
            .snapshot(1)
            .await
            .ok_or_else(|| anyhow::anyhow!("no session"))?;
        assert_eq!(std::fs::read_dir(&session.scratch_dir)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_detection_leaves_nothing_to_archive() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let mut mock = MockDetector::new();
        let mut calls = 0;
        mock.expect_detect().times(2).returning(move |_, dir| {
            calls += 1;
            if calls == 1 {
                let annotated_image = dir.join("result.jpg");
                std::fs::write(&annotated_image, b"annotated")?;
                Ok(Detection {
                    annotated_image,
                    labels: Vec::new(),
                })
            } else {
                Err(DetectionError::Api("500: model crashed".to_string()))
            }
        });
        let handler = handler(&tmp, mock, 5);

        handler.submit_photo(2, t0(), || async { Ok(jpeg()) }).await?;
        let raw = || async {
            Ok(Upload {
                bytes: b"RAW-PHOTO".to_vec(),
                extension: "jpg".to_string(),
            })
        };
        let failed = handler.submit_photo(2, t0(), raw).await;
        assert!(matches!(failed, Err(ref e) if e.kind() == FailureKind::Detection));

        let session = handler
            .registry()
            .snapshot(2)
            .await
            .ok_or_else(|| anyhow::anyhow!("no session"))?;
        assert_eq!(session.last_artifact, None);
        assert_eq!(std::fs::read_dir(&session.scratch_dir)?.count(), 0);

        assert!(handler.request_feedback(2).await);
        assert_eq!(handler.submit_text(2, "wrong").await, TextOutcome::FeedbackSaved);
        // Neither the deleted result nor the raw upload ends up in the archive
        assert!(!tmp.path().join("users_data").join("2").exists());
        Ok(())
    }
}
