use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ConversationSource;

// -- JWT Claims --

/// Claims issued by the external identity provider. The messaging core
/// trusts them as given; it never issues tokens itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub peer_id: Uuid,
    /// Set only if this conversation is being opened about a listing;
    /// ignored when the conversation already exists.
    pub source: Option<ConversationSource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    /// Defaults to the server clock when omitted.
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub conversation_id: Uuid,
    pub last_read_at: DateTime<Utc>,
    pub unread_count: u32,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub body: String,
    /// Client-generated id backing the PENDING/SENT/FAILED delivery state
    /// machine and the resend path.
    pub correlation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResendMessageRequest {
    pub correlation_id: String,
}

// -- Typing --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypingRequest {
    pub is_typing: bool,
}

// -- Internal (ops) --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncUserRequest {
    pub id: Uuid,
    pub display_name: String,
    pub email: Option<String>,
    pub notify_first_message: bool,
    pub notify_offer_activity: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestEmailRequest {
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct TestEmailResponse {
    pub delivered: bool,
    pub provider_message_id: Option<String>,
}
