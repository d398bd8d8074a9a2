mod batch;
mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use valise_api::middleware::{require_auth, require_ops_token};
use valise_api::pipeline::MessagePipeline;
use valise_api::state::{AppState, AppStateInner};
use valise_api::{conversations, messages, notifications, typing, users};
use valise_notify::{HttpEmailProvider, NotifyEngine};
use valise_realtime::{Broadcaster, TypingTracker};
use valise_types::delivery::DeliveryLedger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "valise=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("VALISE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let ops_token = std::env::var("VALISE_OPS_TOKEN").unwrap_or_else(|_| "dev-ops-token".into());
    let db_path = std::env::var("VALISE_DB_PATH").unwrap_or_else(|_| "valise.db".into());
    let host = std::env::var("VALISE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("VALISE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let email_api_url = std::env::var("VALISE_EMAIL_API_URL")
        .unwrap_or_else(|_| "https://api.resend.com/emails".into());
    let email_api_key = std::env::var("VALISE_EMAIL_API_KEY").unwrap_or_default();
    let email_from = std::env::var("VALISE_EMAIL_FROM")
        .unwrap_or_else(|_| "Valise <notifications@valise.app>".into());
    let notify_interval_secs: u64 = std::env::var("VALISE_NOTIFY_INTERVAL_SECS")
        .unwrap_or_else(|_| "300".into())
        .parse()?;
    let notify_batch_limit: u32 = std::env::var("VALISE_NOTIFY_BATCH_LIMIT")
        .unwrap_or_else(|_| "100".into())
        .parse()?;

    // Init database
    let db = Arc::new(valise_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state: the broker and tracker are explicit objects, injected
    // rather than global, so the whole graph is swappable in tests.
    let broadcaster = Broadcaster::new();
    let typing_tracker = TypingTracker::new(broadcaster.clone());
    let pipeline = MessagePipeline::new(db.clone(), broadcaster.clone());
    let provider = HttpEmailProvider::new(email_api_url, email_api_key, email_from);
    let engine = NotifyEngine::new(db.clone(), provider);

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        broadcaster: broadcaster.clone(),
        typing: typing_tracker.clone(),
        pipeline,
        ledger: DeliveryLedger::new(),
        engine,
        jwt_secret: jwt_secret.clone(),
        ops_token,
    });

    // Background workers
    tokio::spawn(typing_tracker.clone().run_sweep_loop());
    tokio::spawn(batch::run_ledger_sweep_loop(app_state.clone()));
    tokio::spawn(batch::run_notify_loop(
        app_state.clone(),
        notify_interval_secs,
        notify_batch_limit,
    ));

    // Routes
    let protected_routes = Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route("/conversations/{conversation_id}/read", post(conversations::mark_read))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/conversations/{conversation_id}/typing", post(typing::set_typing))
        .route("/messages/resend", post(messages::resend_message))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state.clone());

    let internal_routes = Router::new()
        .route("/internal/notifications/run", post(notifications::run_first_message_batch))
        .route("/internal/notifications/offer", post(notifications::send_offer_email))
        .route("/internal/notifications/test", post(notifications::send_test_email))
        .route("/internal/users", put(users::sync_user))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_ops_token))
        .with_state(app_state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws::ws_upgrade))
        .with_state(app_state);

    let app = Router::new()
        .merge(protected_routes)
        .merge(internal_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Valise server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
