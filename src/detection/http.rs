use super::{Detection, DetectionError, Detector};
use async_trait::async_trait;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// Response body of the detection service
#[derive(Debug, Deserialize)]
struct DetectionResponse {
    /// Class label of every detected box
    #[serde(default)]
    labels: Vec<String>,
    /// Annotated image, base64 encoded
    image: String,
}

/// Detector backed by an HTTP inference service.
///
/// The image is posted as multipart field `file`; the service answers with
/// `{"labels": [...], "image": "<base64>"}`.
pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDetector {
    /// Creates a detector posting to `endpoint`
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn request(&self, image: &Path) -> Result<DetectionResponse, DetectionError> {
        let bytes = tokio::fs::read(image).await?;
        let file_name = image
            .file_name()
            .map_or_else(|| "weld.jpg".to_string(), |n| n.to_string_lossy().into_owned());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(image))
            .map_err(|e| DetectionError::Network(e.to_string()))?;

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .map_err(|e| DetectionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DetectionError::Api(format!("{status}: {body}")));
        }

        response
            .json::<DetectionResponse>()
            .await
            .map_err(|e| DetectionError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, image: &Path, output_dir: &Path) -> Result<Detection, DetectionError> {
        let response = self.request(image).await?;
        debug!(labels = response.labels.len(), "Detection service answered");

        let annotated = decode_image(&response.image)?;
        let annotated_image = output_dir.join(format!("{}.jpg", Uuid::new_v4().simple()));
        tokio::fs::write(&annotated_image, annotated).await?;

        Ok(Detection {
            annotated_image,
            labels: response.labels,
        })
    }
}

/// MIME type announced for an upload, judged by its extension
fn mime_for(image: &Path) -> &'static str {
    let ext = image
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Decodes a base64 image, tolerating a `data:` URL prefix.
fn decode_image(encoded: &str) -> Result<Vec<u8>, DetectionError> {
    let payload = encoded
        .split_once("base64,")
        .map_or(encoded, |(_, data)| data)
        .trim();
    if payload.is_empty() {
        return Err(DetectionError::Malformed("empty image".to_string()));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| DetectionError::Malformed(format!("image is not base64: {e}")))
}
