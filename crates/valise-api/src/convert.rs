//! Row-to-API conversions. Corrupt stored ids are logged and defaulted
//! rather than failing a whole page, matching how reads degrade elsewhere.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use valise_db::models::{ConversationRow, ConversationSummaryRow, MessageRow};
use valise_types::models::{
    Conversation, ConversationSource, ConversationSummary, Message, MessagePreview, MessageType,
    SourceType,
};

pub fn parse_uuid(value: &str, context: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("Corrupt uuid '{}' in {}: {}", value, context, e);
        Uuid::default()
    })
}

pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(|| {
        warn!("Out-of-range timestamp {} ms", ms);
        DateTime::default()
    })
}

fn source_from_row(row: &ConversationRow) -> Option<ConversationSource> {
    let kind = SourceType::from_str(row.source_type.as_deref()?)?;
    Some(ConversationSource {
        kind,
        id: parse_uuid(row.source_id.as_deref()?, "conversation source"),
        title: row.source_title.clone().unwrap_or_default(),
    })
}

pub fn conversation_from_row(row: &ConversationRow) -> Conversation {
    Conversation {
        id: parse_uuid(&row.id, "conversation id"),
        participant_one: parse_uuid(&row.participant_one, "participant_one"),
        participant_two: parse_uuid(&row.participant_two, "participant_two"),
        last_read_one: row.last_read_one.map(millis_to_datetime),
        last_read_two: row.last_read_two.map(millis_to_datetime),
        source: source_from_row(row),
        first_message_notified_at: row.first_message_notified_at.map(millis_to_datetime),
        created_at: millis_to_datetime(row.created_at),
    }
}

pub fn message_from_row(row: &MessageRow) -> Message {
    Message {
        id: parse_uuid(&row.id, "message id"),
        conversation_id: parse_uuid(&row.conversation_id, "message conversation_id"),
        sender_id: parse_uuid(&row.sender_id, "message sender_id"),
        body: row.body.clone(),
        message_type: MessageType::from_str(&row.message_type).unwrap_or_else(|| {
            warn!("Unknown message_type '{}' on message {}", row.message_type, row.id);
            MessageType::Normal
        }),
        email_notified_at: row.email_notified_at.map(millis_to_datetime),
        created_at: millis_to_datetime(row.created_at),
    }
}

pub fn summary_from_row(row: &ConversationSummaryRow, viewer_id: &str) -> ConversationSummary {
    let conv = &row.conversation;
    let peer = conv.peer_of(viewer_id).unwrap_or_default();

    let last_message = match (&row.last_sender_id, &row.last_body, row.last_created_at) {
        (Some(sender), Some(body), Some(created_at)) => Some(MessagePreview {
            sender_id: parse_uuid(sender, "preview sender_id"),
            body: body.clone(),
            created_at: millis_to_datetime(created_at),
        }),
        _ => None,
    };

    ConversationSummary {
        conversation_id: parse_uuid(&conv.id, "conversation id"),
        peer_id: parse_uuid(peer, "peer id"),
        source: source_from_row(conv),
        unread_count: row.unread_count,
        last_read_at: conv.last_read_of(viewer_id).map(millis_to_datetime),
        last_message,
        last_activity_at: millis_to_datetime(row.last_created_at.unwrap_or(conv.created_at)),
    }
}
