use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use valise_types::api::SyncUserRequest;

use crate::state::AppState;

/// Mirror a profile from the identity provider. Invoked by the platform on
/// signup and preference changes; recipient resolution reads this table.
pub async fn sync_user(
    State(state): State<AppState>,
    Json(req): Json<SyncUserRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();

    tokio::task::spawn_blocking(move || {
        db.upsert_user(
            &req.id.to_string(),
            &req.display_name,
            req.email.as_deref(),
            req.notify_first_message,
            req.notify_offer_activity,
        )
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::NO_CONTENT)
}
