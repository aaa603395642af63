//! Image extraction from Telegram messages
//!
//! Photos and image documents (photos sent "as file") are both accepted.

use crate::config::MAX_UPLOAD_SIZE;
use crate::conversation::Upload;
use anyhow::Result;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::FileId;

/// Reference to an uploaded image, not yet downloaded
#[derive(Debug, Clone)]
pub struct ImageRef {
    /// Telegram file id
    pub file_id: FileId,
    /// Extension to stage the file with
    pub extension: String,
    /// Size reported by Telegram in bytes
    pub size: u32,
}

/// Finds the image carried by a message, if any.
///
/// For photos the largest size is used. Documents qualify when their MIME
/// type or file name says they are an image.
#[must_use]
pub fn extract_image_ref(msg: &Message) -> Option<ImageRef> {
    if let Some(photo) = msg.photo().and_then(<[_]>::last) {
        return Some(ImageRef {
            file_id: photo.file.id.clone(),
            extension: "jpg".to_string(),
            size: photo.file.size,
        });
    }

    let doc = msg.document()?;
    let mime = doc.mime_type.as_ref().map(|m| m.essence_str().to_string());
    let extension = document_extension(doc.file_name.as_deref(), mime.as_deref())?;
    Some(ImageRef {
        file_id: doc.file.id.clone(),
        extension,
        size: doc.file.size,
    })
}

/// Staging extension for a document, or `None` if it is not an image.
#[must_use]
pub fn document_extension(file_name: Option<&str>, mime: Option<&str>) -> Option<String> {
    let from_name = file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "bmp" | "webp"));
    if from_name.is_some() {
        return from_name;
    }

    match mime? {
        "image/jpeg" => Some("jpg".to_string()),
        "image/png" => Some("png".to_string()),
        "image/bmp" => Some("bmp".to_string()),
        "image/webp" => Some("webp".to_string()),
        _ => None,
    }
}

/// Downloads the image with retries.
///
/// # Errors
///
/// Returns an error if the file exceeds the upload limit or the download
/// keeps failing.
pub async fn download_image(bot: &Bot, image: &ImageRef) -> Result<Upload> {
    if image.size > MAX_UPLOAD_SIZE {
        anyhow::bail!(
            "File too large: {:.1} MB (max 20 MB)",
            f64::from(image.size) / 1024.0 / 1024.0
        );
    }

    let bytes = crate::utils::retry_telegram_operation(|| async {
        let file = bot.get_file(image.file_id.clone()).await?;
        let mut buf = Vec::new();
        bot.download_file(&file.path, &mut buf).await?;
        Ok(buf)
    })
    .await?;

    Ok(Upload {
        bytes,
        extension: image.extension.clone(),
    })
}
