use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use valise_types::api::{Claims, ResendMessageRequest, SendMessageRequest};
use valise_types::delivery::MessageDraft;

use crate::convert::message_from_row;
use crate::pipeline::SendError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: the `created_at` (unix millis) of the
    /// oldest message from the previous page.
    pub before: Option<i64>,
}

fn default_limit() -> u32 {
    50
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let conv_id = conversation_id.to_string();
    let user_id = claims.sub.to_string();
    let limit = query.limit.min(200);
    let before = query.before;

    let rows = tokio::task::spawn_blocking(move || {
        let conversation = db
            .get_conversation(&conv_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;
        if !conversation.is_participant(&user_id) {
            return Err(StatusCode::FORBIDDEN);
        }
        db.get_messages(&conv_id, limit, before)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    let messages: Vec<_> = rows.iter().map(message_from_row).collect();
    Ok(Json(messages))
}

/// Submit a message. With a correlation id the delivery ledger tracks the
/// PENDING/SENT/FAILED lifecycle so a failed attempt can be resent.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if let Some(correlation_id) = req.correlation_id.as_deref() {
        let draft = MessageDraft {
            conversation_id,
            sender_id: claims.sub,
            body: req.body.clone(),
        };
        if !state.ledger.begin(correlation_id, draft) {
            // Same correlation id already in flight or already delivered.
            return Err(StatusCode::CONFLICT);
        }
    }

    let result = state
        .pipeline
        .send(conversation_id, claims.sub, &req.body, req.correlation_id.clone())
        .await;

    match result {
        Ok(message) => {
            if let Some(correlation_id) = req.correlation_id.as_deref() {
                state.ledger.mark_sent(correlation_id, message.id);
            }
            Ok((StatusCode::CREATED, Json(message)))
        }
        Err(err) => {
            if let Some(correlation_id) = req.correlation_id.as_deref() {
                state.ledger.mark_failed(correlation_id);
            }
            Err(send_error_status(err))
        }
    }
}

/// Re-enter the pipeline with the draft of a FAILED send. The retried send
/// is a brand-new message once it succeeds; the storage layer does not
/// deduplicate against the original attempt.
pub async fn resend_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ResendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let draft = state
        .ledger
        .take_failed(&req.correlation_id)
        .ok_or(StatusCode::NOT_FOUND)?;

    if draft.sender_id != claims.sub {
        warn!("Resend of {} attempted by a different user", req.correlation_id);
        state.ledger.mark_failed(&req.correlation_id);
        return Err(StatusCode::FORBIDDEN);
    }

    let result = state
        .pipeline
        .send(
            draft.conversation_id,
            draft.sender_id,
            &draft.body,
            Some(req.correlation_id.clone()),
        )
        .await;

    match result {
        Ok(message) => {
            state.ledger.mark_sent(&req.correlation_id, message.id);
            Ok((StatusCode::CREATED, Json(message)))
        }
        Err(err) => {
            state.ledger.mark_failed(&req.correlation_id);
            Err(send_error_status(err))
        }
    }
}

fn send_error_status(err: SendError) -> StatusCode {
    match err {
        SendError::Validation(_) => StatusCode::BAD_REQUEST,
        SendError::ConversationNotFound => StatusCode::NOT_FOUND,
        SendError::NotParticipant => StatusCode::FORBIDDEN,
        SendError::Storage(e) => {
            error!("Message send failed on storage: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
