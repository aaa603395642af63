//! User-facing texts and keyboards
//!
//! Everything the bot says lives here so handlers only decide *what* to say.

use crate::conversation::{FailureKind, InspectionError};
use crate::detection::count_labels;
use crate::utils::truncate_str;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Callback data of the "leave feedback" button
pub const FEEDBACK_CALLBACK: &str = "feedback";

/// Telegram caption limit
pub const CAPTION_LIMIT: usize = 1024;

/// Maximum length of raw error text shown to users
const ERROR_DETAIL_LIMIT: usize = 300;

/// Greeting for `/start`
pub const GREETING: &str = "Приветствую Вас! Ожидаю фото сварного шва!";

/// Usage text for `/help`
pub const HELP: &str =
    "Ожидаю, либо фото сварного шва, либо комментарий к проведенной диагностике";

/// Summary when the detector found nothing
pub const NO_DEFECTS: &str = "Недостатков не обнаружено!";

/// Header of the defect list
pub const DEFECTS_HEADER: &str = "Обнаружены следующие недостатки:";

/// Offer sent together with the feedback button
pub const FEEDBACK_OFFER: &str = "Если есть замечания по диагностике жми на кнопку";

/// Request for a detailed complaint after the button was pressed
pub const FEEDBACK_PROMPT: &str = "Прошу, как можно подробнее описать замечания к диагностике";

/// Feedback button pressed before any photo was inspected
pub const FEEDBACK_WITHOUT_PHOTO: &str =
    "Сначала отправьте фото сварного шва, затем оставьте замечания к диагностике.";

/// Inline keyboard with the feedback button
#[must_use]
pub fn feedback_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "Обратная связь по диагностике",
        FEEDBACK_CALLBACK,
    )]])
}

/// Caption listing detected defects, most frequent first.
///
/// Labels are HTML-escaped; send with `ParseMode::Html`.
///
/// # Examples
///
/// ```
/// use weld_inspector_bot::bot::views::{defect_summary, NO_DEFECTS};
///
/// assert_eq!(defect_summary(&[]), NO_DEFECTS);
/// ```
#[must_use]
pub fn defect_summary(labels: &[String]) -> String {
    let counts = count_labels(labels);
    if counts.is_empty() {
        return NO_DEFECTS.to_string();
    }

    let lines: Vec<String> = counts
        .iter()
        .map(|(label, count)| format!("{}: {count}", html_escape::encode_text(label)))
        .collect();
    let summary = format!("<b>{DEFECTS_HEADER}</b>\n{}", lines.join("\n"));
    if summary.chars().count() > CAPTION_LIMIT {
        // Cutting could split a tag, fall back to plain lines
        return truncate_str(format!("{DEFECTS_HEADER}\n{}", lines.join("\n")), CAPTION_LIMIT);
    }
    summary
}

/// Rate-limit notice
#[must_use]
pub fn rate_limited(window_minutes: i64) -> String {
    format!(
        "Вы достигли ограничения по загрузке фото, пожалуйста подождите {window_minutes} минут!"
    )
}

/// Thank-you reply after feedback
#[must_use]
pub fn feedback_thanks(name: &str) -> String {
    format!("Спасибо, {name}!")
}

/// Reply to anything that is not a weld photo
#[must_use]
pub fn send_photo_prompt(name: &str) -> String {
    format!(
        "Ожидаю только фото сварного шва для детекции дефектов! Большего, я пока не могу, {name}!"
    )
}

/// Reply for a failed inspection. Raw error text is included only when
/// `expose_details` is set.
#[must_use]
pub fn inspection_failed(error: &InspectionError, expose_details: bool) -> String {
    if error.kind() == FailureKind::Fetch {
        return "Не удалось получить фото, попробуйте отправить его еще раз!".to_string();
    }
    if expose_details {
        let detail = truncate_str(error.to_string(), ERROR_DETAIL_LIMIT);
        format!("При детекции произошла ошибка, {detail}!")
    } else {
        "При детекции произошла ошибка, попробуйте позже!".to_string()
    }
}
