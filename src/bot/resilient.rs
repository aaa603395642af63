//! Resilient messaging utilities with automatic retry for Telegram API operations.
//!
//! Wrappers around sends that retry on transient network failures using
//! exponential backoff with jitter.

use anyhow::Result;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, Message, ParseMode, ReplyMarkup};

/// Send a message with automatic retry on network failures.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
    reply_markup: Option<ReplyMarkup>,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot.send_message(chat_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        if let Some(markup) = reply_markup.clone() {
            req = req.reply_markup(markup);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Send a local image with an HTML caption, retrying on network failures.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_photo_resilient(
    bot: &Bot,
    chat_id: ChatId,
    image: &Path,
    caption: impl Into<String>,
) -> Result<Message> {
    let caption = caption.into();
    crate::utils::retry_telegram_operation(|| async {
        bot.send_photo(chat_id, InputFile::file(image.to_path_buf()))
            .caption(caption.clone())
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| anyhow::anyhow!("Telegram send photo error: {e}"))
    })
    .await
}
