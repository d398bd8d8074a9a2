use std::sync::Arc;

use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use valise_db::Database;
use valise_db::models::now_millis;
use valise_realtime::Broadcaster;
use valise_types::events::ConversationEvent;
use valise_types::models::Message;

use crate::convert::message_from_row;

pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("invalid message: {0}")]
    Validation(String),

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("sender is not a participant of this conversation")]
    NotParticipant,

    /// Storage failure; retryable by the caller.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Validates, persists and fans out individual messages.
///
/// The first-message check is query-then-insert; the race window where two
/// senders both see an empty conversation is accepted because the dedup
/// engine's conditional claim is the real at-most-once guarantee for the
/// notification side effect.
#[derive(Clone)]
pub struct MessagePipeline {
    db: Arc<Database>,
    broadcaster: Broadcaster,
}

impl MessagePipeline {
    pub fn new(db: Arc<Database>, broadcaster: Broadcaster) -> Self {
        Self { db, broadcaster }
    }

    pub async fn send(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
        correlation_id: Option<String>,
    ) -> Result<Message, SendError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(SendError::Validation("message body is empty".into()));
        }
        if body.chars().count() > MAX_MESSAGE_CHARS {
            return Err(SendError::Validation(format!(
                "message body exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }

        let db = self.db.clone();
        let conv_id = conversation_id.to_string();
        let sender = sender_id.to_string();
        let body_owned = body.to_string();

        // Blocking storage work off the async runtime.
        let row = tokio::task::spawn_blocking(move || {
            let conversation = db
                .get_conversation(&conv_id)?
                .ok_or(SendError::ConversationNotFound)?;
            if !conversation.is_participant(&sender) {
                return Err(SendError::NotParticipant);
            }

            let is_first = db.count_messages(&conv_id).map_err(SendError::Storage)? == 0;
            let (message_type, notify_state) = if is_first {
                ("first", "pending")
            } else {
                ("normal", "none")
            };

            let message_id = Uuid::new_v4().to_string();
            let created_at = now_millis();
            db.insert_message(
                &message_id,
                &conv_id,
                &sender,
                &body_owned,
                message_type,
                notify_state,
                created_at,
            )
            .map_err(SendError::Storage)?;

            Ok(valise_db::models::MessageRow {
                id: message_id,
                conversation_id: conv_id,
                sender_id: sender,
                body: body_owned,
                message_type: message_type.to_string(),
                email_notified_at: None,
                notify_attempts: 0,
                created_at,
            })
        })
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            SendError::Storage(anyhow::anyhow!("storage task failed: {e}"))
        })??;

        let message = message_from_row(&row);

        // Best-effort fan-out to live viewers; failure to deliver a hint
        // never fails the send.
        self.broadcaster.publish(ConversationEvent::MessageCreate {
            conversation_id,
            message: message.clone(),
            correlation_id,
        });

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use valise_types::models::MessageType;

    fn pipeline() -> (Arc<Database>, Broadcaster, MessagePipeline, Uuid, Uuid, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let broadcaster = Broadcaster::new();
        let pipeline = MessagePipeline::new(db.clone(), broadcaster.clone());

        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conv = db
            .get_or_create_conversation(&alice.to_string(), &bob.to_string(), None)
            .unwrap();
        let conv_id = conv.id.parse().unwrap();
        (db, broadcaster, pipeline, conv_id, alice, bob)
    }

    #[tokio::test]
    async fn first_message_is_tagged_and_queued_for_notification() {
        let (db, _b, pipeline, conv_id, alice, bob) = pipeline();

        let first = pipeline
            .send(conv_id, alice, "Hi", None)
            .await
            .unwrap();
        assert_eq!(first.message_type, MessageType::First);
        assert!(first.email_notified_at.is_none());

        let second = pipeline
            .send(conv_id, bob, "Hello back", None)
            .await
            .unwrap();
        assert_eq!(second.message_type, MessageType::Normal);

        // Only the first message became a notification candidate.
        let candidates = db.first_message_candidates(100).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].message.id, first.id.to_string());
    }

    #[tokio::test]
    async fn send_rejects_bad_input_and_outsiders() {
        let (_db, _b, pipeline, conv_id, alice, _bob) = pipeline();

        assert!(matches!(
            pipeline.send(conv_id, alice, "   ", None).await,
            Err(SendError::Validation(_))
        ));

        let oversized = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            pipeline.send(conv_id, alice, &oversized, None).await,
            Err(SendError::Validation(_))
        ));

        assert!(matches!(
            pipeline.send(Uuid::new_v4(), alice, "hi", None).await,
            Err(SendError::ConversationNotFound)
        ));

        let mallory = Uuid::new_v4();
        assert!(matches!(
            pipeline.send(conv_id, mallory, "hi", None).await,
            Err(SendError::NotParticipant)
        ));
    }

    #[tokio::test]
    async fn send_publishes_to_live_subscribers_with_correlation_id() {
        let (_db, broadcaster, pipeline, conv_id, alice, _bob) = pipeline();
        let mut sub = broadcaster.subscribe(conv_id);

        pipeline
            .send(conv_id, alice, "Hi", Some("corr-1".into()))
            .await
            .unwrap();

        match sub.recv().await {
            Some(ConversationEvent::MessageCreate {
                message,
                correlation_id,
                ..
            }) => {
                assert_eq!(message.body, "Hi");
                assert_eq!(message.sender_id, alice);
                assert_eq!(correlation_id.as_deref(), Some("corr-1"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
