//! Database row types — these map directly to SQLite rows.
//! Distinct from bazaar-types API models to keep the DB layer independent.
//! Timestamps stay as stored text; see `into_model` for conversion.

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};

use bazaar_types::models::{ChatMessage, Conversation, Notification};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: i64,
    pub product_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub created_at: String,
    pub read_at: Option<String>,
}

pub struct NotificationRow {
    pub id: i64,
    pub user_id: i64,
    pub message: String,
    pub is_read: bool,
    pub created_at: String,
}

/// Parse a stored timestamp. SQLite writes `YYYY-MM-DD HH:MM:SS.fff` without
/// a zone; it is always UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = raw.parse::<DateTime<Utc>>() {
        return Ok(ts);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|ndt| ndt.and_utc())
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

impl ConversationRow {
    pub fn into_model(self) -> Result<Conversation> {
        Ok(Conversation {
            id: self.id,
            product_id: self.product_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

impl MessageRow {
    pub fn into_model(self) -> Result<ChatMessage> {
        Ok(ChatMessage {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            created_at: parse_timestamp(&self.created_at)?,
            read_at: self.read_at.as_deref().map(parse_timestamp).transpose()?,
            content: self.content,
        })
    }
}

impl NotificationRow {
    pub fn into_model(self) -> Result<Notification> {
        Ok(Notification {
            id: self.id,
            created_at: parse_timestamp(&self.created_at)?,
            message: self.message,
            is_read: self.is_read,
        })
    }
}
