//! Per-partner summaries over `chat_messages`.
//!
//! Summaries are derived on every call and never stored. A single windowed
//! query groups the user's messages by counterpart; the latest body comes
//! from the row ranked first inside each partition.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::ChatConversation;

const CONVERSATIONS_SQL: &str = "
    WITH scoped AS (
        SELECT id, sender_id, message, created_at, read,
               CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS partner_id
        FROM chat_messages
        WHERE sender_id = ?1 OR receiver_id = ?1
    ),
    ranked AS (
        SELECT partner_id, sender_id, message, created_at, read,
               ROW_NUMBER() OVER (
                   PARTITION BY partner_id ORDER BY created_at DESC, id DESC
               ) AS rn
        FROM scoped
    )
    SELECT partner_id,
           MAX(CASE WHEN rn = 1 THEN message END) AS last_message,
           MAX(created_at) AS last_message_time,
           SUM(CASE WHEN sender_id = partner_id AND read = 0 THEN 1 ELSE 0 END) AS unread_count
    FROM ranked
    GROUP BY partner_id
    ORDER BY last_message_time DESC, partner_id ASC";

/// One summary per counterpart of `user_id`, most recent conversation first.
///
/// Only messages the partner sent and the user has not read count as unread.
pub fn conversations_for(conn: &Connection, user_id: &str) -> Result<Vec<ChatConversation>, DatabaseError> {
    let mut stmt = conn.prepare(CONVERSATIONS_SQL)?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok(ChatConversation {
            partner_id: row.get(0)?,
            last_message: row.get(1)?,
            last_message_time: row.get::<_, Option<DateTime<Utc>>>(2)?,
            unread_count: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
