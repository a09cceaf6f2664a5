//! Session API endpoints — the HTTP face of the dispatch facade.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use courier_domain::UserId;
use courier_sessions::InitOutcome;

use super::api_error;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/initialize
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct InitializeBody {
    pub user: UserId,
}

/// Idempotent create-or-noop. Returns immediately with the session's
/// current phase; the caller learns of pairing/readiness by polling status
/// or subscribing to `/v1/sessions/events`.
pub async fn initialize_session(
    State(state): State<AppState>,
    Json(body): Json<InitializeBody>,
) -> Response {
    match state.sessions.initialize(&body.user).await {
        Ok(outcome) => {
            let created = matches!(outcome, InitOutcome::Created { .. });
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (
                status,
                Json(serde_json::json!({
                    "user": body.user,
                    "phase": outcome.phase(),
                    "created": created,
                })),
            )
                .into_response()
        }
        Err(e) => api_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/send
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub user: UserId,
    pub to: String,
    pub body: String,
}

/// Send one outbound message through the user's session. Fails fast with
/// 503 while the session is not ready — callers retry, nothing queues.
pub async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<SendBody>,
) -> Response {
    match state.sessions.send(&body.user, &body.to, &body.body).await {
        Ok(to) => Json(serde_json::json!({
            "delivered": true,
            "to": to,
        }))
        .into_response(),
        Err(e) => api_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:user/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_status(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Response {
    let user = match UserId::new(user) {
        Ok(user) => user,
        Err(e) => return api_error(e),
    };
    match state.sessions.status(&user) {
        Some((phase, created_at)) => Json(serde_json::json!({
            "user": user,
            "phase": phase,
            "created_at": created_at.to_rfc3339(),
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no session for user" })),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/sessions/:user
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Explicit disconnect. Idempotent: removing a non-existent session is OK.
pub async fn disconnect_session(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Response {
    let user = match UserId::new(user) {
        Ok(user) => user,
        Err(e) => return api_error(e),
    };
    state.sessions.disconnect(&user).await;
    Json(serde_json::json!({ "user": user, "removed": true })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// List all registered sessions.
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.sessions.list();
    Json(serde_json::json!({
        "sessions": sessions,
        "count": sessions.len(),
    }))
}
