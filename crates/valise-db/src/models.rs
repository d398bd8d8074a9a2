//! Database row types — these map directly to SQLite rows.
//! Distinct from the valise-types API models; timestamps here are unix
//! milliseconds so cursor and ordering comparisons stay integer-exact.

use chrono::Utc;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub struct UserRow {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub notify_first_message: bool,
    pub notify_offer_activity: bool,
    pub created_at: i64,
}

pub struct ConversationRow {
    pub id: String,
    pub participant_one: String,
    pub participant_two: String,
    pub last_read_one: Option<i64>,
    pub last_read_two: Option<i64>,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub source_title: Option<String>,
    pub first_message_notified_at: Option<i64>,
    pub created_at: i64,
}

impl ConversationRow {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participant_one == user_id || self.participant_two == user_id
    }

    /// The other party, if `user_id` is a participant.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if self.participant_one == user_id {
            Some(&self.participant_two)
        } else if self.participant_two == user_id {
            Some(&self.participant_one)
        } else {
            None
        }
    }

    /// Read-cursor high-water mark for `user_id`'s slot.
    pub fn last_read_of(&self, user_id: &str) -> Option<i64> {
        if self.participant_one == user_id {
            self.last_read_one
        } else if self.participant_two == user_id {
            self.last_read_two
        } else {
            None
        }
    }
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub message_type: String,
    pub email_notified_at: Option<i64>,
    pub notify_attempts: i64,
    pub created_at: i64,
}

/// One inbox line: conversation plus derived unread/preview columns.
pub struct ConversationSummaryRow {
    pub conversation: ConversationRow,
    pub unread_count: u32,
    pub last_sender_id: Option<String>,
    pub last_body: Option<String>,
    pub last_created_at: Option<i64>,
}

/// A first-message notification candidate: the message joined with its
/// conversation so the batch worker can claim and resolve in one pass.
pub struct CandidateRow {
    pub message: MessageRow,
    pub conversation: ConversationRow,
}
