//! Webhook and RPC server.
//!
//! Webhook handlers acknowledge the transport immediately and run the
//! pipeline in a spawned task; chat platforms retry on slow acks and the
//! pipeline tolerates re-delivery anyway. The local RPC endpoint runs the
//! pipeline inline and returns the reply.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use soulkun_shared::rpc::{SendMessageRequest, SendMessageResponse, StatusResponse};
use soulkun_shared::{InboundMessage, Scope};

use crate::brain::Brain;
use crate::channels::{ChannelAdapter, ChatworkChannel, TelegramChannel};
use crate::channels::chatwork::ChatworkWebhook;
use crate::channels::telegram::TelegramUpdate;
use crate::config::OrgConfig;
use crate::state::SharedState;

#[derive(Clone)]
pub struct AppState {
    pub brain: Arc<Brain>,
    pub daemon: SharedState,
    pub org: Arc<OrgConfig>,
    pub chatwork: Arc<ChatworkChannel>,
    pub telegram: Arc<TelegramChannel>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(status))
        .route("/v1/message", post(local_message))
        .route("/webhook/chatwork", post(chatwork_webhook))
        .route("/webhook/telegram", post(telegram_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.daemon.read().await.to_status())
}

async fn local_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Json<SendMessageResponse> {
    let started = std::time::Instant::now();
    let mut message =
        InboundMessage::local(&request.room_id, &request.user_id, &request.body);
    if let Some(name) = request.user_name {
        message.sender_name = name;
    }
    let scope = Scope::new(
        &state.org.org_for_room(&request.room_id),
        &request.room_id,
        &request.user_id,
    );

    let outcome = state.brain.handle_message(&message, scope).await;
    state.daemon.write().await.requests_handled += 1;

    Json(SendMessageResponse {
        reply: outcome.reply.text,
        verdict: outcome
            .verdict
            .map(|v| v.to_string())
            .unwrap_or_else(|| "continuation".to_string()),
        latency_ms: started.elapsed().as_millis() as u64,
    })
}

async fn chatwork_webhook(
    State(state): State<AppState>,
    Json(webhook): Json<ChatworkWebhook>,
) -> StatusCode {
    let message = webhook.into_message();

    if !state.chatwork.allows_room(&message.room_id) {
        info!(room = %message.room_id, "chatwork room not allowlisted, ignoring");
        return StatusCode::OK;
    }
    if message.body.is_empty() {
        return StatusCode::OK;
    }

    dispatch(state, message, DispatchVia::Chatwork);
    StatusCode::OK
}

async fn telegram_webhook(
    State(state): State<AppState>,
    Json(update): Json<TelegramUpdate>,
) -> StatusCode {
    let Some(message) = update.into_message() else {
        return StatusCode::OK;
    };

    if !state.telegram.allows_room(&message.room_id) {
        info!(chat = %message.room_id, "telegram chat not allowlisted, ignoring");
        return StatusCode::OK;
    }

    dispatch(state, message, DispatchVia::Telegram);
    StatusCode::OK
}

enum DispatchVia {
    Chatwork,
    Telegram,
}

/// Ack now, reply from a spawned task.
fn dispatch(state: AppState, message: InboundMessage, via: DispatchVia) {
    tokio::spawn(async move {
        let scope = Scope::new(
            &state.org.org_for_room(&message.room_id),
            &message.room_id,
            &message.sender_id,
        );
        let outcome = state.brain.handle_message(&message, scope).await;
        state.daemon.write().await.requests_handled += 1;

        let sent = match via {
            DispatchVia::Chatwork => {
                state
                    .chatwork
                    .send(&outcome.reply.room_id, &outcome.reply.text)
                    .await
            }
            DispatchVia::Telegram => {
                state
                    .telegram
                    .send(&outcome.reply.room_id, &outcome.reply.text)
                    .await
            }
        };
        match sent {
            Ok(true) => {}
            Ok(false) => warn!(room = %outcome.reply.room_id, "reply rejected by channel"),
            Err(e) => warn!(error = %e, "reply delivery failed"),
        }
    });
}
