use chrono::Utc;
use rusqlite::{params, Row};
use tracing;

use crate::conversations::conversations_for;
use crate::db::{DatabaseError, StoreGuardian};
use crate::models::*;

const COLUMNS: &str = "id, sender_id, receiver_id, message, created_at, read";

/// Messages are append-only; the only mutation is flipping `read` to 1.
pub struct ChatRepository<'a> {
    store: &'a StoreGuardian,
}

impl<'a> ChatRepository<'a> {
    pub fn new(store: &'a StoreGuardian) -> Self {
        Self { store }
    }

    pub fn send(&self, new: &NewChatMessage) -> Result<i64, DatabaseError> {
        if new.sender_id.trim().is_empty() || new.receiver_id.trim().is_empty() {
            return Err(DatabaseError::Validation("sender and receiver are required".into()));
        }
        if new.message.trim().is_empty() {
            return Err(DatabaseError::Validation("message is required".into()));
        }

        let id = self.store.with_store(|conn| {
            conn.execute(
                "INSERT INTO chat_messages (sender_id, receiver_id, message, created_at, read)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![new.sender_id, new.receiver_id, new.message, Utc::now()],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        tracing::debug!(id, "Chat message stored");
        Ok(id)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<ChatMessage>, DatabaseError> {
        self.store.with_store(|conn| {
            let result = conn.query_row(
                &format!("SELECT {COLUMNS} FROM chat_messages WHERE id = ?1"),
                params![id],
                message_from_row,
            );
            match result {
                Ok(msg) => Ok(Some(msg)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Both directions between two participants, oldest first.
    pub fn thread(&self, user_id: &str, partner_id: &str) -> Result<Vec<ChatMessage>, DatabaseError> {
        self.store.with_store(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM chat_messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![user_id, partner_id], message_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Mark one message read. Returns false if it was already read or missing.
    pub fn mark_read(&self, id: i64) -> Result<bool, DatabaseError> {
        self.store.with_store(|conn| {
            let changed = conn.execute(
                "UPDATE chat_messages SET read = 1 WHERE id = ?1 AND read = 0",
                params![id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Mark everything `partner_id` sent to `user_id` as read.
    pub fn mark_conversation_read(&self, user_id: &str, partner_id: &str) -> Result<usize, DatabaseError> {
        let changed = self.store.with_store(|conn| {
            Ok(conn.execute(
                "UPDATE chat_messages SET read = 1
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND read = 0",
                params![user_id, partner_id],
            )?)
        })?;
        if changed > 0 {
            tracing::debug!(changed, "Conversation marked read");
        }
        Ok(changed)
    }

    pub fn unread_total(&self, user_id: &str) -> Result<i64, DatabaseError> {
        self.store.with_store(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE receiver_id = ?1 AND read = 0",
                params![user_id],
                |r| r.get(0),
            )?)
        })
    }

    /// Per-partner summaries for `user_id`.
    pub fn conversations(&self, user_id: &str) -> Result<Vec<ChatConversation>, DatabaseError> {
        self.store.with_store(|conn| conversations_for(conn, user_id))
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        message: row.get(3)?,
        created_at: row.get(4)?,
        read: row.get(5)?,
    })
}
