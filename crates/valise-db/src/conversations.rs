use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::Database;
use crate::models::{ConversationRow, ConversationSummaryRow, now_millis};

/// Immutable "about" metadata captured at conversation creation.
pub struct SourceParams<'a> {
    pub kind: &'a str,
    pub id: &'a str,
    pub title: &'a str,
}

impl Database {
    /// Look up or lazily create the conversation between two users.
    ///
    /// Slots are assigned by lexicographic id order, so both argument orders
    /// resolve to the same row. A unique-constraint race on insert is
    /// resolved by re-querying, never surfaced to the caller.
    pub fn get_or_create_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        source: Option<SourceParams<'_>>,
    ) -> Result<ConversationRow> {
        if user_a == user_b {
            return Err(anyhow!("conversation requires two distinct participants"));
        }
        let (one, two) = if user_a <= user_b {
            (user_a, user_b)
        } else {
            (user_b, user_a)
        };

        self.with_conn(|conn| {
            if let Some(existing) = query_conversation_by_pair(conn, one, two)? {
                return Ok(existing);
            }

            let id = Uuid::new_v4().to_string();
            let created_at = now_millis();
            let inserted = conn.execute(
                "INSERT INTO conversations
                    (id, participant_one, participant_two, source_type, source_id, source_title, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id,
                    one,
                    two,
                    source.as_ref().map(|s| s.kind),
                    source.as_ref().map(|s| s.id),
                    source.as_ref().map(|s| s.title),
                    created_at,
                ],
            );

            match inserted {
                Ok(_) => query_conversation_by_id(conn, &id)?
                    .ok_or_else(|| anyhow!("conversation {} vanished after insert", id)),
                // Lost the creation race; the winner's row is the answer.
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    query_conversation_by_pair(conn, one, two)?
                        .ok_or_else(|| anyhow!("conversation ({}, {}) missing after unique violation", one, two))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation_by_id(conn, id))
    }

    /// All conversations the user participates in, most recent activity
    /// first, with recomputed unread counts and a latest-message preview.
    pub fn list_conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.participant_one, c.participant_two,
                        c.last_read_one, c.last_read_two,
                        c.source_type, c.source_id, c.source_title,
                        c.first_message_notified_at, c.created_at,
                        (SELECT COUNT(*) FROM messages m
                          WHERE m.conversation_id = c.id
                            AND m.sender_id != ?1
                            AND m.created_at > COALESCE(
                                CASE WHEN c.participant_one = ?1
                                     THEN c.last_read_one ELSE c.last_read_two END, 0)
                        ) AS unread_count,
                        (SELECT m.sender_id FROM messages m
                          WHERE m.conversation_id = c.id
                          ORDER BY m.created_at DESC, m.id DESC LIMIT 1) AS last_sender_id,
                        (SELECT m.body FROM messages m
                          WHERE m.conversation_id = c.id
                          ORDER BY m.created_at DESC, m.id DESC LIMIT 1) AS last_body,
                        (SELECT m.created_at FROM messages m
                          WHERE m.conversation_id = c.id
                          ORDER BY m.created_at DESC, m.id DESC LIMIT 1) AS last_created_at
                 FROM conversations c
                 WHERE c.participant_one = ?1 OR c.participant_two = ?1
                 ORDER BY COALESCE(
                     (SELECT MAX(m.created_at) FROM messages m WHERE m.conversation_id = c.id),
                     c.created_at) DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationSummaryRow {
                        conversation: conversation_from_row(row)?,
                        unread_count: row.get(10)?,
                        last_sender_id: row.get(11)?,
                        last_body: row.get(12)?,
                        last_created_at: row.get(13)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Advance the user's read cursor to `at_ms`, never backward. Returns
    /// the effective cursor after the update, or None if the user is not a
    /// participant of the conversation.
    pub fn mark_read(&self, conversation_id: &str, user_id: &str, at_ms: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let conv = match query_conversation_by_id(conn, conversation_id)? {
                Some(conv) => conv,
                None => return Ok(None),
            };
            let column = if conv.participant_one == user_id {
                "last_read_one"
            } else if conv.participant_two == user_id {
                "last_read_two"
            } else {
                return Ok(None);
            };

            // Monotonic high-water mark: concurrent writers converge on the
            // latest timestamp.
            conn.execute(
                &format!(
                    "UPDATE conversations
                     SET {column} = CASE WHEN {column} IS NULL OR {column} < ?2 THEN ?2 ELSE {column} END
                     WHERE id = ?1"
                ),
                rusqlite::params![conversation_id, at_ms],
            )?;

            let effective: i64 = conn.query_row(
                &format!("SELECT {column} FROM conversations WHERE id = ?1"),
                [conversation_id],
                |row| row.get(0),
            )?;

            Ok(Some(effective))
        })
    }

    /// Recompute the unread count for (conversation, user) from source data.
    /// Stored counters would drift under concurrent writers; this never can.
    pub fn unread_count(&self, conversation_id: &str, user_id: &str) -> Result<u32> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.conversation_id = ?1
                   AND m.sender_id != ?2
                   AND m.created_at > COALESCE(
                       (SELECT CASE WHEN c.participant_one = ?2
                                    THEN c.last_read_one ELSE c.last_read_two END
                          FROM conversations c WHERE c.id = ?1), 0)",
                rusqlite::params![conversation_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_one: row.get(1)?,
        participant_two: row.get(2)?,
        last_read_one: row.get(3)?,
        last_read_two: row.get(4)?,
        source_type: row.get(5)?,
        source_id: row.get(6)?,
        source_title: row.get(7)?,
        first_message_notified_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

const CONVERSATION_COLUMNS: &str = "id, participant_one, participant_two, \
     last_read_one, last_read_two, source_type, source_id, source_title, \
     first_message_notified_at, created_at";

pub(crate) fn query_conversation_by_id(
    conn: &Connection,
    id: &str,
) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"
    ))?;
    let row = stmt.query_row([id], conversation_from_row).optional()?;
    Ok(row)
}

fn query_conversation_by_pair(
    conn: &Connection,
    one: &str,
    two: &str,
) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         WHERE participant_one = ?1 AND participant_two = ?2"
    ))?;
    let row = stmt
        .query_row([one, two], conversation_from_row)
        .optional()?;
    Ok(row)
}
