//! Utility functions shared by the Telegram layer.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

/// Truncates a string to at most `max_chars` characters, respecting UTF-8 boundaries.
///
/// # Examples
///
/// ```
/// use weld_inspector_bot::utils::truncate_str;
/// let s = "Привет, мир!";
/// assert_eq!(truncate_str(s, 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Retry a Telegram API operation with exponential backoff.
///
/// Meant for file operations (`get_file` + `download_file`) and sends that
/// may fail on transient network errors.
///
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max attempts: 3 (constants in `config.rs`)
///
/// # Examples
///
/// ```no_run
/// use weld_inspector_bot::utils::retry_telegram_operation;
/// use anyhow::Result;
///
/// async fn download_file() -> Result<Vec<u8>> {
///     Ok(vec![])
/// }
///
/// # async fn example() -> Result<()> {
/// let buffer = retry_telegram_operation(|| async {
///     download_file().await
/// }).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns the last error once all attempts are exhausted.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter) // Add jitter to prevent thundering herd
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_truncate_str_unicode() {
        assert_eq!(truncate_str("Сварной шов", 6), "Сварно");
        assert_eq!(truncate_str("short", 10), "short");
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() -> Result<()> {
        let attempts = AtomicUsize::new(0);
        let value = retry_telegram_operation(|| async {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("connection reset");
            }
            Ok(7)
        })
        .await?;
        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
