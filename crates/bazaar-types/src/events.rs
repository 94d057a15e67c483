use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events pushed to clients over the chat stream.
///
/// Serialized as `{"type": "...", "data": {...}}`, one JSON object per frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    /// An entry was added to the user's notification feed
    Notification {
        id: i64,
        message: String,
        created_at: DateTime<Utc>,
    },

    /// A message was posted to a conversation the user takes part in
    Message {
        id: i64,
        conversation_id: i64,
        sender_id: i64,
        content: String,
        created_at: DateTime<Utc>,
    },

    /// The other participant is typing
    Typing { conversation_id: i64, user_id: i64 },
}

impl ChatEvent {
    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Notification { .. } => "notification",
            Self::Message { .. } => "message",
            Self::Typing { .. } => "typing",
        }
    }
}
