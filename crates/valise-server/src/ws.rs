use std::collections::HashMap;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    extract::ws::{Message, WebSocket},
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use valise_api::state::AppState;
use valise_types::api::Claims;
use valise_types::events::{ConversationEvent, GatewayCommand};

/// Outbound queue between the forward tasks and the socket writer.
const OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: String,
}

/// Authenticate at the upgrade layer, then hand the socket to the
/// connection loop.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token_data = decode::<Claims>(
        &query.token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user_id = token_data.claims.sub;
    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, user_id)))
}

/// One connected viewer: reads gateway commands, maintains one broadcaster
/// subscription per requested conversation, and forwards their events out
/// through a single writer task.
async fn handle_connection(socket: WebSocket, state: AppState, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} connected to gateway", user_id);

    let (out_tx, mut out_rx) = mpsc::channel::<ConversationEvent>(OUTBOUND_QUEUE);

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize gateway event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        // conversation_id -> forward task; aborting a task drops its
        // Subscription, which unsubscribes from the broadcaster.
        let mut forwards: HashMap<Uuid, JoinHandle<()>> = HashMap::new();

        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            let command: GatewayCommand = match serde_json::from_str(&text) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Bad gateway command from {}: {}", user_id, e);
                    continue;
                }
            };

            match command {
                GatewayCommand::Subscribe { conversation_ids } => {
                    for conversation_id in conversation_ids {
                        if forwards.contains_key(&conversation_id) {
                            continue;
                        }
                        if !is_participant(&recv_state, conversation_id, user_id).await {
                            warn!(
                                "{} tried to subscribe to conversation {} they are not part of",
                                user_id, conversation_id
                            );
                            continue;
                        }

                        let mut subscription = recv_state.broadcaster.subscribe(conversation_id);
                        let tx = out_tx.clone();
                        forwards.insert(
                            conversation_id,
                            tokio::spawn(async move {
                                while let Some(event) = subscription.recv().await {
                                    if tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                            }),
                        );
                    }
                }
                GatewayCommand::Unsubscribe { conversation_ids } => {
                    for conversation_id in conversation_ids {
                        if let Some(task) = forwards.remove(&conversation_id) {
                            task.abort();
                        }
                    }
                }
                GatewayCommand::StartTyping { conversation_id } => {
                    if forwards.contains_key(&conversation_id) {
                        recv_state.typing.set_typing(conversation_id, user_id, true);
                    }
                }
                GatewayCommand::StopTyping { conversation_id } => {
                    if forwards.contains_key(&conversation_id) {
                        recv_state.typing.set_typing(conversation_id, user_id, false);
                    }
                }
            }
        }

        for (_, task) in forwards {
            task.abort();
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} disconnected from gateway", user_id);
}

async fn is_participant(state: &AppState, conversation_id: Uuid, user_id: Uuid) -> bool {
    let db = state.db.clone();
    let conv_id = conversation_id.to_string();
    let uid = user_id.to_string();

    tokio::task::spawn_blocking(move || {
        db.get_conversation(&conv_id)
            .map(|conv| conv.map_or(false, |c| c.is_participant(&uid)))
            .unwrap_or(false)
    })
    .await
    .unwrap_or(false)
}
