use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events fanned out to live viewers of a conversation.
///
/// Delivery is best-effort: a viewer who is offline at publish time misses
/// the event and reconciles by re-fetching on reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ConversationEvent {
    /// A new message was persisted. Carries the sender's correlation id so
    /// the sending client can match it against its optimistic local copy.
    MessageCreate {
        conversation_id: Uuid,
        message: Message,
        correlation_id: Option<String>,
    },

    /// A participant advanced their read cursor.
    ReadStateUpdate {
        conversation_id: Uuid,
        user_id: Uuid,
        last_read_at: chrono::DateTime<chrono::Utc>,
        unread_count: u32,
    },

    /// A participant started typing. Ephemeral; expires after the typing TTL.
    TypingStart { conversation_id: Uuid, user_id: Uuid },

    /// A participant stopped typing (explicit stop or TTL expiry).
    TypingStop { conversation_id: Uuid, user_id: Uuid },
}

impl ConversationEvent {
    /// Every event is scoped to exactly one conversation topic.
    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::MessageCreate { conversation_id, .. } => *conversation_id,
            Self::ReadStateUpdate { conversation_id, .. } => *conversation_id,
            Self::TypingStart { conversation_id, .. } => *conversation_id,
            Self::TypingStop { conversation_id, .. } => *conversation_id,
        }
    }
}

/// Commands sent FROM client TO server over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Subscribe to events for specific conversations. The server only
    /// forwards events for conversations the caller participates in.
    Subscribe { conversation_ids: Vec<Uuid> },

    /// Drop subscriptions for specific conversations.
    Unsubscribe { conversation_ids: Vec<Uuid> },

    /// Indicate typing in a conversation.
    StartTyping { conversation_id: Uuid },

    /// Explicitly stop the typing indicator.
    StopTyping { conversation_id: Uuid },
}
