//! Weld defect detection
//!
//! The detector itself runs outside this process; [`Detector`] is the seam
//! the conversation handler calls through.

/// HTTP client for a detection service
pub mod http;

pub use http::HttpDetector;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while running a detection
#[derive(Debug, Error)]
pub enum DetectionError {
    /// Error during network communication
    #[error("Network error: {0}")]
    Network(String),
    /// Error returned by the detection service
    #[error("API error: {0}")]
    Api(String),
    /// Response could not be decoded
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// Reading the input or writing the annotated image failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The service did not answer in time
    #[error("Detection timed out after {0}s")]
    Timeout(u64),
}

/// Result of one detection run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Annotated image written by the detector
    pub annotated_image: PathBuf,
    /// One label per detected box, in detector order
    pub labels: Vec<String>,
}

/// A weld defect detector
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Detector: Send + Sync {
    /// Runs detection on `image` and writes the annotated copy into `output_dir`.
    async fn detect(&self, image: &Path, output_dir: &Path) -> Result<Detection, DetectionError>;
}

/// Counts labels, most frequent first, ties in first-seen order.
#[must_use]
pub fn count_labels(labels: &[String]) -> Vec<(&str, usize)> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for label in labels {
        match counts.iter_mut().find(|(seen, _)| *seen == label.as_str()) {
            Some((_, count)) => *count += 1,
            None => counts.push((label.as_str(), 1)),
        }
    }
    // Stable sort keeps first-seen order among equal counts
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}
