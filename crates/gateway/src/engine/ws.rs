//! WebSocket endpoint for protocol engine connections.
//!
//! Flow:
//! 1. Engine connects to `/v1/engine/ws?token=<pre-shared-token>`
//! 2. Engine sends `engine_hello` naming the user it serves
//! 3. Gateway responds with `engine_welcome`, carrying the stored resume
//!    record and the save-interval floor
//! 4. Bidirectional loop: engine pushes `event` / `record_save` frames,
//!    gateway pushes `send_request` / `contact_request` / `record_request`,
//!    both exchange `ping`/`pong`

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use uuid::Uuid;

use courier_domain::UserId;
use courier_protocol::EngineMessage;

use crate::engine::hub::{AttachedEngine, EngineReply};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query params
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Pre-shared token for engine authentication.
    pub token: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /v1/engine/ws — upgrade to WebSocket.
///
/// Authenticated with its own pre-shared token (read once at startup from
/// the env var named by `transport.engine_token_env`); unset token = open
/// access, dev mode.
pub async fn engine_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if let Some(expected_hash) = &state.engine_token_hash {
        let provided = query.token.as_deref().unwrap_or("");
        // Hash to a fixed length, then compare in constant time.
        let provided_hash = Sha256::digest(provided.as_bytes());
        if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "invalid or missing engine token",
            )
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // 1. Wait for engine_hello.
    let hello = match wait_for_hello(&mut ws_stream).await {
        Some(h) => h,
        None => {
            tracing::warn!("engine disconnected before sending engine_hello");
            return;
        }
    };

    let user = hello.user;
    let conn_id = Uuid::new_v4();

    // 2. Send engine_welcome with the stored resume record, so the engine
    // can reconnect without a fresh pairing.
    let resume = match state.records.load(&user).await {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(user = %user, error = %e, "resume record unreadable, engine pairs fresh");
            None
        }
    };
    let welcome = EngineMessage::EngineWelcome {
        gateway_version: env!("CARGO_PKG_VERSION").to_string(),
        resume,
        min_save_interval_secs: state.config.transport.min_save_interval_secs,
    };
    if send_ws_message(&mut ws_sink, &welcome).await.is_err() {
        tracing::warn!(user = %user, "failed to send engine_welcome");
        return;
    }

    tracing::info!(
        user = %user,
        engine_version = %hello.engine_version,
        "engine connected"
    );

    // 3. Channel for outbound messages, gateway → engine.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<EngineMessage>(64);

    // 4. Register with the hub (replaces a previous connection for this user).
    state.engines.attach(AttachedEngine {
        conn_id,
        user: user.clone(),
        engine_version: hello.engine_version,
        attached_at: Utc::now(),
        sink: outbound_tx,
    });

    // Writer task: forwards outbound channel messages to the WS sink.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if send_ws_message(&mut ws_sink, &msg).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: process inbound messages from the engine.
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                if let Ok(engine_msg) = serde_json::from_str::<EngineMessage>(&text) {
                    handle_inbound(&state, &user, engine_msg).await;
                } else {
                    tracing::debug!(user = %user, "ignoring unparseable engine message");
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Cleanup: fail in-flight requests and drop the connection entry
    // (unless a reconnect already replaced it).
    writer.abort();
    state.engines.detach(&user, conn_id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct HelloData {
    user: UserId,
    engine_version: String,
}

async fn wait_for_hello(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<HelloData> {
    // Give the engine 10 seconds to send engine_hello.
    let timeout = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                if let Ok(EngineMessage::EngineHello {
                    user,
                    engine_version,
                }) = serde_json::from_str::<EngineMessage>(&text)
                {
                    return Some(HelloData {
                        user,
                        engine_version,
                    });
                }
            }
        }
        None
    })
    .await;

    timeout.unwrap_or(None)
}

async fn send_ws_message(
    sink: &mut (impl SinkExt<Message> + Unpin),
    msg: &EngineMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

async fn handle_inbound(state: &AppState, user: &UserId, msg: EngineMessage) {
    match msg {
        EngineMessage::Event { event } => {
            state.engines.forward_event(user, event);
        }
        EngineMessage::RecordSave { record } => {
            // Persistence hook: the engine decides when to snapshot, the
            // store only guarantees atomicity.
            if let Err(e) = state.records.save(user, record).await {
                tracing::warn!(user = %user, error = %e, "record save failed");
            }
        }
        EngineMessage::SendResponse {
            request_id,
            delivered,
            error,
        } => {
            state
                .engines
                .complete(&request_id, EngineReply::Send { delivered, error });
        }
        EngineMessage::ContactResponse {
            request_id,
            contact,
            error,
        } => {
            state
                .engines
                .complete(&request_id, EngineReply::Contact { contact, error });
        }
        EngineMessage::Ping { timestamp } => {
            if let Some(sink) = state.engines.sink_for(user) {
                let _ = sink.send(EngineMessage::Pong { timestamp }).await;
            }
        }
        EngineMessage::Pong { .. } => {}
        other => {
            tracing::debug!(
                user = %user,
                msg_type = ?std::mem::discriminant(&other),
                "unexpected inbound engine message"
            );
        }
    }
}
