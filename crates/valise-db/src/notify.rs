//! Storage side of the notification dedup engine: the conditional-update
//! claim on `conversations.first_message_notified_at` (the single point of
//! mutual exclusion in the core — the database's conditional write is the
//! lock), candidate scans, and the generic dedupe-key gate.

use anyhow::Result;

use crate::Database;
use crate::conversations::query_conversation_by_id;
use crate::messages::message_from_row;
use crate::models::CandidateRow;

impl Database {
    /// Oldest-first batch of first messages whose email has not been
    /// confirmed and whose notify state is still pending.
    pub fn first_message_candidates(&self, limit: u32) -> Result<Vec<CandidateRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.sender_id, m.body, m.message_type,
                        m.email_notified_at, m.notify_attempts, m.created_at
                 FROM messages m
                 WHERE m.message_type = 'first'
                   AND m.email_notified_at IS NULL
                   AND m.notify_state = 'pending'
                 ORDER BY m.created_at ASC
                 LIMIT ?1",
            )?;
            let messages = stmt
                .query_map([limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut candidates = Vec::with_capacity(messages.len());
            for message in messages {
                if let Some(conversation) = query_conversation_by_id(conn, &message.conversation_id)? {
                    candidates.push(CandidateRow {
                        message,
                        conversation,
                    });
                }
            }
            Ok(candidates)
        })
    }

    /// Claim the right to send the first-message email for a conversation.
    /// Conditioned on the gate still being NULL: at most one worker gets
    /// true for a given conversation; everyone else lost the race.
    pub fn claim_first_message_notification(&self, conversation_id: &str, at_ms: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE conversations
                 SET first_message_notified_at = ?2
                 WHERE id = ?1 AND first_message_notified_at IS NULL",
                rusqlite::params![conversation_id, at_ms],
            )?;
            Ok(changed == 1)
        })
    }

    /// Roll a claim back after a failed dispatch so a later batch run can
    /// retry. Conditioned on our own claim timestamp so a concurrent
    /// re-claim is never clobbered.
    pub fn release_first_message_claim(&self, conversation_id: &str, claimed_at_ms: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE conversations
                 SET first_message_notified_at = NULL
                 WHERE id = ?1 AND first_message_notified_at = ?2",
                rusqlite::params![conversation_id, claimed_at_ms],
            )?;
            Ok(())
        })
    }

    /// Confirm the external send: the claim becomes permanent and the
    /// message records when its email went out.
    pub fn confirm_first_message_sent(&self, message_id: &str, at_ms: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages
                 SET email_notified_at = ?2, notify_state = 'sent'
                 WHERE id = ?1",
                rusqlite::params![message_id, at_ms],
            )?;
            Ok(())
        })
    }

    /// "Decided not to send" is terminal success: the claim stays in place
    /// and the candidate never reappears.
    pub fn mark_notify_skipped(&self, message_id: &str) -> Result<()> {
        self.set_notify_state(message_id, "skipped")
    }

    /// Terminal failure: excluded from future scans.
    pub fn mark_notify_failed(&self, message_id: &str) -> Result<()> {
        self.set_notify_state(message_id, "failed")
    }

    fn set_notify_state(&self, message_id: &str, state: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET notify_state = ?2 WHERE id = ?1",
                rusqlite::params![message_id, state],
            )?;
            Ok(())
        })
    }

    /// Increment the transient-failure counter; returns the new total so
    /// the engine can enforce its bounded retry policy.
    pub fn bump_notify_attempts(&self, message_id: &str) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET notify_attempts = notify_attempts + 1 WHERE id = ?1",
                [message_id],
            )?;
            let attempts = conn.query_row(
                "SELECT notify_attempts FROM messages WHERE id = ?1",
                [message_id],
                |row| row.get(0),
            )?;
            Ok(attempts)
        })
    }

    /// Insert-if-absent gate for generic action notifications. Returns true
    /// when this caller owns the key; false means someone already decided.
    pub fn try_insert_dedupe(&self, category: &str, dedupe_key: &str, at_ms: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO notification_dedupe (category, dedupe_key, sent_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![category, dedupe_key, at_ms],
            )?;
            Ok(changed == 1)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn seed_first_message(db: &Database) -> (String, String) {
        let conv = db.get_or_create_conversation("alice", "bob", None).unwrap();
        db.insert_message("m1", &conv.id, "alice", "hi", "first", "pending", 1_000)
            .unwrap();
        (conv.id.clone(), "m1".to_string())
    }

    #[test]
    fn claim_succeeds_once_then_loses() {
        let db = Database::open_in_memory().unwrap();
        let (conv_id, _) = seed_first_message(&db);

        assert!(db.claim_first_message_notification(&conv_id, 10).unwrap());
        // Second worker loses the race.
        assert!(!db.claim_first_message_notification(&conv_id, 20).unwrap());

        let conv = db.get_conversation(&conv_id).unwrap().unwrap();
        assert_eq!(conv.first_message_notified_at, Some(10));
    }

    #[test]
    fn release_restores_claimability_but_only_for_own_claim() {
        let db = Database::open_in_memory().unwrap();
        let (conv_id, _) = seed_first_message(&db);

        assert!(db.claim_first_message_notification(&conv_id, 10).unwrap());

        // A release with the wrong timestamp is a no-op.
        db.release_first_message_claim(&conv_id, 99).unwrap();
        let conv = db.get_conversation(&conv_id).unwrap().unwrap();
        assert_eq!(conv.first_message_notified_at, Some(10));

        db.release_first_message_claim(&conv_id, 10).unwrap();
        assert!(db.claim_first_message_notification(&conv_id, 30).unwrap());
    }

    #[test]
    fn candidate_scan_excludes_sent_skipped_and_failed() {
        let db = Database::open_in_memory().unwrap();
        let (conv_id, msg_id) = seed_first_message(&db);

        let other = db.get_or_create_conversation("carol", "dave", None).unwrap();
        db.insert_message("m2", &other.id, "carol", "hello", "first", "pending", 2_000)
            .unwrap();
        // Normal messages are never candidates.
        db.insert_message("m3", &conv_id, "bob", "reply", "normal", "none", 3_000)
            .unwrap();

        let candidates = db.first_message_candidates(100).unwrap();
        assert_eq!(candidates.len(), 2);
        // Oldest first.
        assert_eq!(candidates[0].message.id, msg_id);
        assert_eq!(candidates[1].message.id, "m2");

        db.confirm_first_message_sent(&msg_id, 50).unwrap();
        db.mark_notify_skipped("m2").unwrap();
        assert!(db.first_message_candidates(100).unwrap().is_empty());
    }

    #[test]
    fn attempts_counter_accumulates() {
        let db = Database::open_in_memory().unwrap();
        let (_, msg_id) = seed_first_message(&db);

        assert_eq!(db.bump_notify_attempts(&msg_id).unwrap(), 1);
        assert_eq!(db.bump_notify_attempts(&msg_id).unwrap(), 2);
    }

    #[test]
    fn dedupe_gate_admits_each_key_once() {
        let db = Database::open_in_memory().unwrap();

        assert!(db.try_insert_dedupe("offer", "offer-accepted:o1", 1).unwrap());
        assert!(!db.try_insert_dedupe("offer", "offer-accepted:o1", 2).unwrap());
        // Different category, same key: independent gate.
        assert!(db.try_insert_dedupe("test", "offer-accepted:o1", 3).unwrap());
    }
}
