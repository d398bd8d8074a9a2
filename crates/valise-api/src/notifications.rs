use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use valise_notify::{NotifyError, OfferAction, engine::DEFAULT_BATCH_LIMIT};
use valise_types::api::{TestEmailRequest, TestEmailResponse};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunQuery {
    pub limit: Option<u32>,
}

/// Cron entry point: one first-message batch run. Idempotent by
/// construction, safe to invoke concurrently; the summary is the
/// observability contract.
pub async fn run_first_message_batch(
    State(state): State<AppState>,
    Query(query): Query<RunQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_BATCH_LIMIT);

    let summary = state
        .engine
        .run_first_message_batch(limit)
        .await
        .map_err(|e| {
            error!("First-message batch run failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    info!(
        "First-message batch: {} candidates, {} sent, {} skipped, {} errors",
        summary.candidates, summary.sent, summary.skipped, summary.errors
    );
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OfferEmailRequest {
    pub action: OfferAction,
    pub offer_id: Uuid,
    pub offer_title: String,
    pub recipient_id: Uuid,
}

/// Offer lifecycle email, deduplicated per (action, offer).
pub async fn send_offer_email(
    State(state): State<AppState>,
    Json(req): Json<OfferEmailRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let outcome = state
        .engine
        .send_offer_email(
            req.action,
            &req.offer_id.to_string(),
            &req.offer_title,
            &req.recipient_id.to_string(),
        )
        .await
        .map_err(notify_error_status)?;

    Ok(Json(serde_json::json!({ "outcome": outcome })))
}

/// Operational smoke test: send one synthetic email, bypassing scanning.
pub async fn send_test_email(
    State(state): State<AppState>,
    Json(req): Json<TestEmailRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let receipt = state
        .engine
        .send_test_email(&req.to)
        .await
        .map_err(notify_error_status)?;

    Ok(Json(TestEmailResponse {
        delivered: true,
        provider_message_id: receipt.provider_message_id,
    }))
}

fn notify_error_status(err: NotifyError) -> StatusCode {
    match err {
        NotifyError::Validation(_) => StatusCode::BAD_REQUEST,
        NotifyError::NotFound(_) => StatusCode::NOT_FOUND,
        NotifyError::Conflict => StatusCode::CONFLICT,
        NotifyError::TransientDispatch(e) => {
            error!("Transient dispatch failure: {}", e);
            StatusCode::BAD_GATEWAY
        }
        NotifyError::PermanentDispatch(e) => {
            error!("Permanent dispatch failure: {}", e);
            StatusCode::BAD_GATEWAY
        }
        NotifyError::Storage(e) => {
            error!("Notification storage failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
