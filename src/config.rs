//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! transport constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Default length of the rate-limit window in minutes
pub const DEFAULT_RATE_LIMIT_WINDOW_MINUTES: u64 = 10;
/// Default number of photos a user may submit inside one window
pub const DEFAULT_MAX_PHOTOS_PER_WINDOW: u32 = 10;
/// Default timeout for a single detector call in seconds
pub const DEFAULT_DETECTOR_TIMEOUT_SECS: u64 = 120;

// Telegram API retry configuration
/// Maximum attempts for a Telegram file operation
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff between attempts in milliseconds
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound for the backoff in milliseconds
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;

/// Maximum accepted upload size (20 MB, the Bot API download limit)
pub const MAX_UPLOAD_SIZE: u32 = 20 * 1024 * 1024;

/// File name prefix of the rolling log files
pub const LOG_FILE_PREFIX: &str = "weld_inspector_bot";
/// Default number of rotated log files kept on disk
pub const DEFAULT_LOG_MAX_FILES: usize = 5;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Endpoint of the weld defect detection service
    #[serde(default = "default_detector_url")]
    pub detector_url: String,
    /// Timeout for one detection request
    #[serde(default = "default_detector_timeout_secs")]
    pub detector_timeout_secs: u64,

    /// Length of the rate-limit window
    #[serde(default = "default_rate_limit_window_minutes")]
    pub rate_limit_window_minutes: u64,
    /// Photos allowed per window
    #[serde(default = "default_max_photos_per_window")]
    pub max_photos_per_window: u32,

    /// Root directory holding per-user scratch directories
    #[serde(default = "default_temp_root")]
    pub temp_root: PathBuf,
    /// Root directory holding archived feedback
    #[serde(default = "default_archive_root")]
    pub archive_root: PathBuf,

    /// Directory of the rolling log files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Rotated log files kept before the oldest is deleted
    #[serde(default = "default_log_max_files")]
    pub log_max_files: usize,

    /// Whether raw error text is shown to users on failed detections
    #[serde(default = "default_expose_error_details")]
    pub expose_error_details: bool,
}

fn default_detector_url() -> String {
    "http://127.0.0.1:8000/predict".to_string()
}

const fn default_detector_timeout_secs() -> u64 {
    DEFAULT_DETECTOR_TIMEOUT_SECS
}

const fn default_rate_limit_window_minutes() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_MINUTES
}

const fn default_max_photos_per_window() -> u32 {
    DEFAULT_MAX_PHOTOS_PER_WINDOW
}

fn default_temp_root() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_archive_root() -> PathBuf {
    PathBuf::from("users_data")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

const fn default_log_max_files() -> usize {
    DEFAULT_LOG_MAX_FILES
}

const fn default_expose_error_details() -> bool {
    true
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use weld_inspector_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or a value is out of range.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP__MAX_PHOTOS_PER_WINDOW=3 ./target/app`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain UPPER_SNAKE_CASE variables, empty ones treated as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would disable the rate limiter or the detector, and
    /// temp roots that must never be wiped recursively.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_window_minutes == 0 {
            return Err(ConfigError::Message(
                "rate_limit_window_minutes must be positive".to_string(),
            ));
        }
        if self.max_photos_per_window == 0 {
            return Err(ConfigError::Message(
                "max_photos_per_window must be positive".to_string(),
            ));
        }
        if self.detector_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "detector_timeout_secs must be positive".to_string(),
            ));
        }
        if !is_dedicated_dir(&self.temp_root) {
            return Err(ConfigError::Message(format!(
                "temp_root {:?} must name a dedicated directory",
                self.temp_root
            )));
        }
        Ok(())
    }

    /// Rate-limit window as a `chrono` duration
    #[must_use]
    pub fn rate_limit_window(&self) -> chrono::TimeDelta {
        let minutes = i64::try_from(self.rate_limit_window_minutes).unwrap_or(i64::MAX / 60_000);
        chrono::TimeDelta::try_minutes(minutes).unwrap_or(chrono::TimeDelta::MAX)
    }

    /// Detector timeout as a std duration
    #[must_use]
    pub const fn detector_timeout(&self) -> Duration {
        Duration::from_secs(self.detector_timeout_secs)
    }
}

/// `true` when `path` names at least one real directory component, so that
/// `""`, `"."`, `".."` and `"/"` are refused.
fn is_dedicated_dir(path: &Path) -> bool {
    path.components()
        .any(|component| matches!(component, Component::Normal(_)))
}
