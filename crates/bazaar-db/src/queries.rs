use crate::Database;
use crate::models::{ConversationRow, MessageRow, NotificationRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, ErrorCode, Row};

const NOW: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

impl Database {
    // -- Users --

    /// Returns None if the username is already taken. The UNIQUE constraint
    /// decides, so concurrent registrations cannot both succeed.
    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let inserted = conn.query_row(
                "INSERT INTO users (username, password) VALUES (?1, ?2) RETURNING id",
                (username, password_hash),
                |row| row.get(0),
            );
            match inserted {
                Ok(id) => Ok(Some(id)),
                Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password, created_at FROM users WHERE username = ?1",
                [username],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Conversations --

    pub fn find_conversation(&self, product_id: i64, buyer_id: i64, seller_id: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| query_conversation_id(conn, product_id, buyer_id, seller_id))
    }

    pub fn insert_conversation(&self, product_id: i64, buyer_id: i64, seller_id: i64) -> Result<i64> {
        self.with_conn(|conn| insert_conversation(conn, product_id, buyer_id, seller_id))
    }

    /// Lookup-before-insert under the connection lock, so concurrent callers
    /// for the same triple always converge on one row.
    /// Returns (id, created) — created=true means a new row was inserted.
    pub fn ensure_conversation(&self, product_id: i64, buyer_id: i64, seller_id: i64) -> Result<(i64, bool)> {
        self.with_conn(|conn| {
            if let Some(id) = query_conversation_id(conn, product_id, buyer_id, seller_id)? {
                return Ok((id, false));
            }
            let id = insert_conversation(conn, product_id, buyer_id, seller_id)?;
            Ok((id, true))
        })
    }

    pub fn get_conversation(&self, id: i64) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, product_id, buyer_id, seller_id, created_at, updated_at
                 FROM conversations WHERE id = ?1",
                [id],
                conversation_from_row,
            )
            .optional()
        })
    }

    /// Returns (buyer_id, seller_id), or None if the conversation does not exist.
    pub fn get_conversation_participants(&self, conversation_id: i64) -> Result<Option<(i64, i64)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT buyer_id, seller_id FROM conversations WHERE id = ?1",
                [conversation_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
    }

    pub fn list_conversations_for_user(&self, user_id: i64) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, product_id, buyer_id, seller_id, created_at, updated_at
                 FROM conversations
                 WHERE buyer_id = ?1 OR seller_id = ?1
                 ORDER BY updated_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([user_id], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message and bump the conversation's `updated_at` in one
    /// transaction.
    pub fn insert_message(&self, conversation_id: i64, sender_id: i64, content: &str) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let row = tx.query_row(
                "INSERT INTO messages (conversation_id, sender_id, content) VALUES (?1, ?2, ?3)
                 RETURNING id, conversation_id, sender_id, content, created_at, read_at",
                rusqlite::params![conversation_id, sender_id, content],
                message_from_row,
            )?;
            tx.execute(
                &format!("UPDATE conversations SET updated_at = {NOW} WHERE id = ?1"),
                [conversation_id],
            )?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// The newest `limit` messages (older than message `before`, if given),
    /// returned oldest first.
    pub fn list_messages(&self, conversation_id: i64, limit: u32, before: Option<i64>) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, content, created_at, read_at FROM (
                     SELECT id, conversation_id, sender_id, content, created_at, read_at
                     FROM messages
                     WHERE conversation_id = ?1 AND (?2 IS NULL OR id < ?2)
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?3
                 )
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![conversation_id, before, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, user_id: i64, message: &str) -> Result<NotificationRow> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                "INSERT INTO notifications (user_id, message) VALUES (?1, ?2)
                 RETURNING id, user_id, message, is_read, created_at",
                rusqlite::params![user_id, message],
                notification_from_row,
            )?;
            Ok(row)
        })
    }

    pub fn list_notifications(&self, user_id: i64, unread_only: bool) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, message, is_read, created_at
                 FROM notifications
                 WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
                 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, unread_only], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_unread_notifications(&self, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Returns false if no notification with that id belongs to the user.
    pub fn mark_notification_read(&self, user_id: i64, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn mark_all_notifications_read(&self, user_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                [user_id],
            )?;
            Ok(changed)
        })
    }

    pub fn delete_notification(&self, user_id: i64, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
            )?;
            Ok(changed > 0)
        })
    }
}

fn query_conversation_id(conn: &Connection, product_id: i64, buyer_id: i64, seller_id: i64) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM conversations WHERE product_id = ?1 AND buyer_id = ?2 AND seller_id = ?3",
        [product_id, buyer_id, seller_id],
        |row| row.get(0),
    )
    .optional()
}

fn insert_conversation(conn: &Connection, product_id: i64, buyer_id: i64, seller_id: i64) -> Result<i64> {
    let id = conn.query_row(
        "INSERT INTO conversations (product_id, buyer_id, seller_id) VALUES (?1, ?2, ?3) RETURNING id",
        [product_id, buyer_id, seller_id],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        product_id: row.get(1)?,
        buyer_id: row.get(2)?,
        seller_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        read_at: row.get(5)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message: row.get(2)?,
        is_read: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
