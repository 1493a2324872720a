//! Inbound HTTP API.
//!
//! One request type starts or continues a session; the response only
//! acknowledges with the thread id, and all real output arrives through the
//! WebSocket fan-out. Malformed requests are rejected here, before any stage
//! runs.

pub mod ws;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::events::ChannelId;
use crate::pipeline::Coordinator;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub coordinator: Coordinator,
    pub ws_tx: broadcast::Sender<String>,
}

pub type SharedState = Arc<AppState>;

// ── Request/response payloads ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub input: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub channel_id: String,
}

#[derive(Serialize)]
struct ChatAccepted {
    thread_id: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────

/// Accept one user turn. Processing is asynchronous: the pipeline runs in a
/// spawned task and streams its output to the request's channel.
async fn chat_handler(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.input.trim().is_empty() {
        return Err(ApiError::BadRequest("input must not be empty".to_string()));
    }
    if request.channel_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "channel_id must not be empty".to_string(),
        ));
    }

    let session = state
        .coordinator
        .ensure_session(request.thread_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let thread_id = session.as_str().to_string();
    info!(session = %session, channel = %request.channel_id, "Accepted turn");

    let channel = ChannelId::new(request.channel_id);
    let task_state = state.clone();
    tokio::spawn(async move {
        task_state
            .coordinator
            .process_turn(session, channel, request.input)
            .await;
    });

    Ok((StatusCode::ACCEPTED, Json(ChatAccepted { thread_id })))
}

#[derive(Deserialize)]
struct WsQuery {
    channel: String,
}

async fn ws_handler(
    websocket: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let rx = state.ws_tx.subscribe();
    websocket.on_upgrade(move |socket| ws::serve_socket(socket, rx, query.channel))
}

async fn health_check() -> &'static str {
    "OK"
}
