//! Session registry
//!
//! Owns every user's session behind a per-user lock. Transport-agnostic:
//! keys are plain chat identifiers.

use super::{ConversationState, RateLimitPolicy, Session};
use crate::workspace::TempWorkspace;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

/// Result of an admission check
#[derive(Clone, Debug)]
pub struct Admission {
    /// Whether the photo may be processed
    pub allowed: bool,
    /// Session state right after the check
    pub session: Session,
}

/// What a feedback text should be archived against
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedbackTarget {
    /// Scratch directory holding the last inspection result
    pub scratch_dir: PathBuf,
    /// Annotated image returned by the last inspection, if any
    pub last_artifact: Option<PathBuf>,
}

struct UserSlot {
    session: Mutex<Session>,
    /// Serializes clear → write → detect → archive on the scratch directory
    workspace: Arc<Mutex<()>>,
}

/// Registry of user sessions
pub struct SessionRegistry {
    slots: RwLock<HashMap<i64, Arc<UserSlot>>>,
    policy: RateLimitPolicy,
    workspace: TempWorkspace,
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(policy: RateLimitPolicy, workspace: TempWorkspace) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            policy,
            workspace,
        }
    }

    /// Rate-limit policy in force
    #[must_use]
    pub const fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    async fn slot(&self, user_id: i64) -> Option<Arc<UserSlot>> {
        let slots = self.slots.read().await;
        slots.get(&user_id).cloned()
    }

    /// Checks whether a new photo from `user_id` is admitted at `now`.
    ///
    /// Creates the session on first contact; the first photo is always admitted.
    pub async fn admit(&self, user_id: i64, now: DateTime<Utc>) -> Admission {
        if let Some(slot) = self.slot(user_id).await {
            return self.admit_existing(&slot, now).await;
        }

        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get(&user_id).cloned() {
            // Lost the race against another event from the same user
            drop(slots);
            return self.admit_existing(&slot, now).await;
        }

        let session = Session::new(user_id, now, self.workspace.allocate(user_id));
        debug!(user_id, scratch_dir = %session.scratch_dir.display(), "Session created");
        slots.insert(
            user_id,
            Arc::new(UserSlot {
                session: Mutex::new(session.clone()),
                workspace: Arc::new(Mutex::new(())),
            }),
        );

        Admission {
            allowed: true,
            session,
        }
    }

    async fn admit_existing(&self, slot: &UserSlot, now: DateTime<Utc>) -> Admission {
        let mut session = slot.session.lock().await;
        let decision = self.policy.check(session.window, now);
        session.window = decision.next;
        if decision.window_reset {
            debug!(user_id = session.user_id, "Rate-limit window reset");
        }

        Admission {
            allowed: decision.allowed,
            session: session.clone(),
        }
    }

    /// Copy of the current session, if the user was seen before
    pub async fn snapshot(&self, user_id: i64) -> Option<Session> {
        let slot = self.slot(user_id).await?;
        let session = slot.session.lock().await;
        Some(session.clone())
    }

    /// Sets the conversation state. Returns `false` if the user has no session.
    pub async fn set_state(&self, user_id: i64, state: ConversationState) -> bool {
        let Some(slot) = self.slot(user_id).await else {
            return false;
        };
        slot.session.lock().await.state = state;
        true
    }

    /// If the user awaits feedback, switches back to idle and returns the
    /// archive target. Returns `None` otherwise.
    pub async fn take_feedback_target(&self, user_id: i64) -> Option<FeedbackTarget> {
        let slot = self.slot(user_id).await?;
        let mut session = slot.session.lock().await;
        if !session.awaiting_feedback() {
            return None;
        }
        session.state = ConversationState::Idle;
        Some(FeedbackTarget {
            scratch_dir: session.scratch_dir.clone(),
            last_artifact: session.last_artifact.clone(),
        })
    }

    /// Remembers the annotated image of the latest inspection
    pub async fn record_artifact(&self, user_id: i64, artifact: PathBuf) {
        if let Some(slot) = self.slot(user_id).await {
            slot.session.lock().await.last_artifact = Some(artifact);
        }
    }

    /// Forgets the annotated image, e.g. once its scratch dir was cleared
    pub async fn clear_artifact(&self, user_id: i64) {
        if let Some(slot) = self.slot(user_id).await {
            slot.session.lock().await.last_artifact = None;
        }
    }

    /// Locks the user's scratch directory until the guard is dropped
    pub async fn lock_workspace(&self, user_id: i64) -> Option<OwnedMutexGuard<()>> {
        let slot = self.slot(user_id).await?;
        Some(slot.workspace.clone().lock_owned().await)
    }

    /// Number of known users
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Check if registry is empty
    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}
