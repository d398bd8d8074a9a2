use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use valise_db::conversations::SourceParams;
use valise_db::models::now_millis;
use valise_types::api::{Claims, CreateConversationRequest, MarkReadRequest, MarkReadResponse};
use valise_types::events::ConversationEvent;

use crate::convert::{conversation_from_row, millis_to_datetime, summary_from_row};
use crate::state::AppState;

/// Inbox listing: every conversation the caller participates in, newest
/// activity first, with recomputed unread counts.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();
    let viewer = user_id.clone();

    let rows = tokio::task::spawn_blocking(move || db.list_conversations_for_user(&user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let summaries: Vec<_> = rows.iter().map(|row| summary_from_row(row, &viewer)).collect();
    Ok(Json(summaries))
}

/// Open (or return the existing) conversation with a peer. Idempotent for
/// both argument orders; the source metadata only sticks on first creation.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.peer_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let me = claims.sub.to_string();
    let peer = req.peer_id.to_string();

    let row = tokio::task::spawn_blocking(move || {
        let source_id = req.source.as_ref().map(|s| s.id.to_string());
        let source = req.source.as_ref().zip(source_id.as_deref()).map(|(s, id)| SourceParams {
            kind: s.kind.as_str(),
            id,
            title: &s.title,
        });
        db.get_or_create_conversation(&me, &peer, source)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(conversation_from_row(&row))))
}

/// Advance the caller's read cursor (monotonic) and tell live viewers.
/// The cursor move is the durable operation; the broadcast is best-effort
/// and never rolls it back.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let at_ms = req.at.map(|t| t.timestamp_millis()).unwrap_or_else(now_millis);

    let db = state.db.clone();
    let conv_id = conversation_id.to_string();
    let user_id = claims.sub.to_string();

    let (effective, unread) = tokio::task::spawn_blocking(move || {
        let effective = db
            .mark_read(&conv_id, &user_id, at_ms)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;
        let unread = db
            .unread_count(&conv_id, &user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<_, StatusCode>((effective, unread))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    let last_read_at = millis_to_datetime(effective);

    state.broadcaster.publish(ConversationEvent::ReadStateUpdate {
        conversation_id,
        user_id: claims.sub,
        last_read_at,
        unread_count: unread,
    });

    Ok(Json(MarkReadResponse {
        conversation_id,
        last_read_at,
        unread_count: unread,
    }))
}
