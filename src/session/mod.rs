//! Per-user sessions: rate-limit window, scratch directory and conversation state.

pub mod rate_limit;
pub mod registry;

pub use rate_limit::{RateDecision, RateLimitPolicy, WindowState};
pub use registry::{Admission, FeedbackTarget, SessionRegistry};

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Conversation state of a user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConversationState {
    /// Waiting for a photo
    #[default]
    Idle,
    /// The user asked to leave feedback on the last diagnosis
    AwaitingFeedback,
}

/// Session of one user, alive for the whole process lifetime
#[derive(Clone, Debug)]
pub struct Session {
    /// Chat identifier of the requester
    pub user_id: i64,
    /// Rate-limit window bookkeeping
    pub window: WindowState,
    /// Private scratch directory, created lazily by the workspace manager
    pub scratch_dir: PathBuf,
    /// Current conversation state
    pub state: ConversationState,
    /// Annotated image of the most recent successful inspection
    pub last_artifact: Option<PathBuf>,
}

impl Session {
    /// Creates the session of a user first seen at `now`
    #[must_use]
    pub const fn new(user_id: i64, now: DateTime<Utc>, scratch_dir: PathBuf) -> Self {
        Self {
            user_id,
            window: WindowState::opened_at(now),
            scratch_dir,
            state: ConversationState::Idle,
            last_artifact: None,
        }
    }

    /// Start of the current rate-limit window
    #[must_use]
    pub const fn window_start(&self) -> DateTime<Utc> {
        self.window.window_start
    }

    /// Photos counted in the current window
    #[must_use]
    pub const fn photo_count(&self) -> u32 {
        self.window.photo_count
    }

    /// Whether the next text message is treated as feedback
    #[must_use]
    pub fn awaiting_feedback(&self) -> bool {
        self.state == ConversationState::AwaitingFeedback
    }
}
