use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a conversation is "about": a purchase request or a trip offer.
/// Immutable once set at conversation creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Request,
    Trip,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Trip => "trip",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "request" => Some(Self::Request),
            "trip" => Some(Self::Trip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSource {
    pub kind: SourceType,
    pub id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Normal,
    First,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::First => "first",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "first" => Some(Self::First),
            _ => None,
        }
    }
}

/// A durable two-party messaging thread. Participant slots are ordered
/// lexicographically by user id so (A,B) and (B,A) map to the same row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_one: Uuid,
    pub participant_two: Uuid,
    pub last_read_one: Option<DateTime<Utc>>,
    pub last_read_two: Option<DateTime<Utc>>,
    pub source: Option<ConversationSource>,
    pub first_message_notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub message_type: MessageType,
    pub email_notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePreview {
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// One row of a user's inbox: the conversation, who the other party is,
/// the recomputed unread count, and a preview of the latest message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: Uuid,
    pub peer_id: Uuid,
    pub source: Option<ConversationSource>,
    pub unread_count: u32,
    pub last_read_at: Option<DateTime<Utc>>,
    pub last_message: Option<MessagePreview>,
    pub last_activity_at: DateTime<Utc>,
}
