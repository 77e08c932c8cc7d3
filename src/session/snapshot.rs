use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;
use crate::action::ImageRef;

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// One completed turn in the rolling history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Speaker,

    /// Full text of the turn
    pub text: String,

    /// When the turn completed
    pub timestamp: DateTime<Utc>,
}

/// A dispatched or completed action, as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    pub id: String,

    /// Action kind, e.g. `GEN_IMAGE`
    pub kind: String,

    pub timestamp: DateTime<Utc>,

    pub description: String,
}

/// Everything an observer (HUD, HTTP client) can see of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,

    pub state: SessionState,

    /// Human-readable reason for `AUTH` or `ERROR`
    pub error_message: Option<String>,

    /// Completed turns, newest first
    pub history: Vec<TranscriptEntry>,

    /// Action log, newest first
    pub actions: Vec<ActionLog>,

    /// Most recent generated image
    pub last_image: Option<ImageRef>,

    /// When the snapshot was taken
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            state: SessionState::Idle,
            error_message: None,
            history: Vec::new(),
            actions: Vec::new(),
            last_image: None,
            updated_at: Utc::now(),
        }
    }

    /// Newest turn if it completed after `seen`; a full history keeps its
    /// length as turns rotate through it
    pub fn turn_after(&self, seen: Option<DateTime<Utc>>) -> Option<&TranscriptEntry> {
        self.history
            .first()
            .filter(|entry| seen.map_or(true, |seen| entry.timestamp > seen))
    }
}

/// Insert `item` at the front and drop the oldest beyond `limit`
pub(crate) fn push_newest<T>(items: &mut Vec<T>, item: T, limit: usize) {
    items.insert(0, item);
    items.truncate(limit);
}
