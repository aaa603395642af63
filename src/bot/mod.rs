/// Command, message and callback handlers
pub mod handlers;
/// Image extraction and download
pub mod media;
/// Retrying Telegram sends
pub mod resilient;
/// Texts and keyboards
pub mod views;
