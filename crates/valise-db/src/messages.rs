use anyhow::Result;
use rusqlite::Row;

use crate::Database;
use crate::models::MessageRow;

impl Database {
    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
        message_type: &str,
        notify_state: &str,
        created_at: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (id, conversation_id, sender_id, body, message_type, notify_state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, conversation_id, sender_id, body, message_type, notify_state, created_at],
            )?;
            Ok(())
        })
    }

    /// Count of all messages ever persisted in a conversation. Used for the
    /// first-message check on the send path.
    pub fn count_messages(&self, conversation_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Newest-first page of messages. Cursor-based pagination: pass the
    /// `created_at` of the oldest message from the previous page as `before`
    /// to fetch older history.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, body, message_type,
                        email_notified_at, notify_attempts, created_at
                 FROM messages
                 WHERE conversation_id = ?1
                   AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, before, limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        body: row.get(3)?,
        message_type: row.get(4)?,
        email_notified_at: row.get(5)?,
        notify_attempts: row.get(6)?,
        created_at: row.get(7)?,
    })
}
