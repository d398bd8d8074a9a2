use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use valise_types::api::{Claims, TypingRequest};

use crate::state::AppState;

/// Start/refresh or clear the caller's typing signal. Ephemeral: nothing is
/// persisted, and the signal self-expires after the TTL.
pub async fn set_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TypingRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let conv_id = conversation_id.to_string();
    let user_id = claims.sub.to_string();

    // Only participants may signal into a conversation.
    let authorized = tokio::task::spawn_blocking(move || {
        db.get_conversation(&conv_id)
            .map(|conv| conv.map_or(false, |c| c.is_participant(&user_id)))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if !authorized {
        return Err(StatusCode::FORBIDDEN);
    }

    state.typing.set_typing(conversation_id, claims.sub, req.is_typing);
    Ok(StatusCode::NO_CONTENT)
}
