use crate::bot::media::{download_image, extract_image_ref};
use crate::bot::resilient::{send_message_resilient, send_photo_resilient};
use crate::bot::views;
use crate::config::Settings;
use crate::conversation::{ConversationHandler, PhotoOutcome, TextOutcome};
use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::Arc;
use teloxide::{
    prelude::*,
    types::{ChatAction, ReplyMarkup},
    utils::command::BotCommands,
};
use tracing::{debug, error, info};

/// Supported commands for the bot
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Greet the user
    #[command(description = "Start the bot.")]
    Start,
    /// Explain what the bot expects
    #[command(description = "Show usage.")]
    Help,
}

// Helper function to get the user's first name from a Message
fn get_user_name(msg: &Message) -> String {
    msg.from
        .as_ref()
        .map(|user| user.first_name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Session key of a message: the chat it came from
#[must_use]
pub const fn session_id(msg: &Message) -> i64 {
    msg.chat.id.0
}

/// Handle `/start`
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    send_message_resilient(&bot, msg.chat.id, views::GREETING, None, None).await?;
    Ok(())
}

/// Handle `/help`. Does not change the conversation state.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn help(bot: Bot, msg: Message) -> Result<()> {
    send_message_resilient(&bot, msg.chat.id, views::HELP, None, None).await?;
    Ok(())
}

/// Handle a photo or a document.
///
/// Inspection failures are reported to the user and logged here; only
/// failures to talk to Telegram are returned.
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn handle_image(
    bot: Bot,
    msg: Message,
    conversation: Arc<ConversationHandler>,
    settings: Arc<Settings>,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let user_id = session_id(&msg);
    let name = get_user_name(&msg);

    let Some(image) = extract_image_ref(&msg) else {
        info!(user_id, "User {name} uploaded a document that is not an image");
        send_message_resilient(&bot, chat_id, views::send_photo_prompt(&name), None, None)
            .await?;
        return Ok(());
    };

    if let Err(e) = bot.send_chat_action(chat_id, ChatAction::Typing).await {
        debug!("Failed to send chat action: {e}");
    }

    let outcome = conversation
        .submit_photo(user_id, Utc::now(), || download_image(&bot, &image))
        .await;

    match outcome {
        Ok(PhotoOutcome::RateLimited) => {
            let minutes = conversation.registry().policy().window().num_minutes();
            send_message_resilient(&bot, chat_id, views::rate_limited(minutes), None, None)
                .await?;
        }
        Ok(PhotoOutcome::Inspected(report)) => {
            let summary = views::defect_summary(&report.labels);
            send_photo_resilient(&bot, chat_id, &report.annotated_image, summary).await?;
            send_message_resilient(
                &bot,
                chat_id,
                views::FEEDBACK_OFFER,
                None,
                Some(ReplyMarkup::InlineKeyboard(views::feedback_keyboard())),
            )
            .await?;
        }
        Err(e) => {
            error!(user_id, "User {name} raise error on prediction: {e:#}");
            let text = views::inspection_failed(&e, settings.expose_error_details);
            send_message_resilient(&bot, chat_id, text, None, None).await?;
        }
    }
    Ok(())
}

/// Handle a text message: feedback if requested, otherwise a photo prompt.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn handle_text(
    bot: Bot,
    msg: Message,
    conversation: Arc<ConversationHandler>,
) -> Result<()> {
    let user_id = session_id(&msg);
    let name = get_user_name(&msg);
    let text = msg.text().unwrap_or_default();

    let reply = match conversation.submit_text(user_id, text).await {
        TextOutcome::FeedbackSaved => {
            info!(user_id, "User {name} saved feedback");
            views::feedback_thanks(&name)
        }
        TextOutcome::PromptForPhoto => {
            info!(user_id, "User {name} sent text instead of a photo");
            views::send_photo_prompt(&name)
        }
    };
    send_message_resilient(&bot, msg.chat.id, reply, None, None).await?;
    Ok(())
}

/// Handle any other message kind (stickers, voice, ...)
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn handle_other(bot: Bot, msg: Message) -> Result<()> {
    let name = get_user_name(&msg);
    send_message_resilient(&bot, msg.chat.id, views::send_photo_prompt(&name), None, None)
        .await?;
    Ok(())
}

/// Handle inline button presses
///
/// # Errors
///
/// Returns an error if the callback has no chat or the reply cannot be sent.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    conversation: Arc<ConversationHandler>,
) -> Result<()> {
    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };

    let _ = bot.answer_callback_query(q.id.clone()).await;

    let chat_id = q
        .message
        .as_ref()
        .map(|msg| msg.chat().id)
        .ok_or_else(|| anyhow!("Callback message missing chat id"))?;

    if data != views::FEEDBACK_CALLBACK {
        debug!(data, "Unknown callback data");
        return Ok(());
    }

    let text = if conversation.request_feedback(chat_id.0).await {
        views::FEEDBACK_PROMPT
    } else {
        views::FEEDBACK_WITHOUT_PHOTO
    };
    send_message_resilient(&bot, chat_id, text, None, None).await?;
    Ok(())
}
