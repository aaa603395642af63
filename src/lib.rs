//! Telegram bot that inspects weld seam photos with an object detector,
//! rate-limits users and collects feedback on the diagnosis.

/// Feedback archive
pub mod archive;
/// Telegram transport
pub mod bot;
/// Settings and constants
pub mod config;
/// Photo → detection → feedback flow
pub mod conversation;
/// Detector seam and HTTP client
pub mod detection;
/// Sessions and rate limiting
pub mod session;
/// Shared helpers
pub mod utils;
/// Scratch directories
pub mod workspace;
