//! Sliding-window photo rate limiter
//!
//! Pure decision logic: the registry feeds it the stored window state and
//! the captured `now`, then writes the returned state back.

use chrono::{DateTime, TimeDelta, Utc};

/// Window bookkeeping stored per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Start of the current window
    pub window_start: DateTime<Utc>,
    /// Photos counted in the current window, including the current one
    pub photo_count: u32,
}

impl WindowState {
    /// State of a window opened by a first submission at `now`
    #[must_use]
    pub const fn opened_at(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            photo_count: 1,
        }
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// State to store back into the session
    pub next: WindowState,
    /// Whether the submission is admitted
    pub allowed: bool,
    /// Whether a new window was started
    pub window_reset: bool,
}

/// Rate-limit policy: at most `max_photos` submissions per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    window: TimeDelta,
    max_photos: u32,
}

impl RateLimitPolicy {
    /// Creates a policy from a window length and a per-window limit
    #[must_use]
    pub const fn new(window: TimeDelta, max_photos: u32) -> Self {
        Self { window, max_photos }
    }

    /// Window length
    #[must_use]
    pub const fn window(&self) -> TimeDelta {
        self.window
    }

    /// Maximum photos per window
    #[must_use]
    pub const fn max_photos(&self) -> u32 {
        self.max_photos
    }

    /// Decides admission of one more submission at `now`.
    ///
    /// A submission at exactly `window_start + window` opens a new window.
    /// Blocked submissions still increment the counter.
    #[must_use]
    pub fn check(&self, state: WindowState, now: DateTime<Utc>) -> RateDecision {
        if now.signed_duration_since(state.window_start) >= self.window {
            return RateDecision {
                next: WindowState::opened_at(now),
                allowed: true,
                window_reset: true,
            };
        }

        let photo_count = state.photo_count.saturating_add(1);
        RateDecision {
            next: WindowState {
                window_start: state.window_start,
                photo_count,
            },
            allowed: photo_count <= self.max_photos,
            window_reset: false,
        }
    }
}
