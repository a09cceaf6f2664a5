pub mod auth;
pub mod engines;
pub mod events;
pub mod health;
pub mod sessions;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;

use courier_domain::Error;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no bearer token) and **protected**
/// (gated behind the API-token middleware). The engine WS endpoint lives in
/// the public set because it authenticates with its own pre-shared token.
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/v1/engine/ws", get(crate::engine::ws::engine_ws));

    let protected = Router::new()
        // Sessions (dispatch facade)
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/initialize", post(sessions::initialize_session))
        .route("/v1/sessions/send", post(sessions::send_message))
        .route("/v1/sessions/events", get(events::session_events_sse))
        .route("/v1/sessions/:user/status", get(sessions::get_status))
        .route("/v1/sessions/:user", delete(sessions::disconnect_session))
        // Engines (introspection)
        .route("/v1/engines", get(engines::list_engines))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`,
/// with the status derived from the error taxonomy.
pub(crate) fn api_error(e: Error) -> Response {
    let status = match &e {
        Error::NotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::RecipientNotFound(_) | Error::UnknownSession(_) => StatusCode::NOT_FOUND,
        Error::InvalidUserId(_) => StatusCode::BAD_REQUEST,
        Error::AuthFailed(_) => StatusCode::CONFLICT,
        Error::Transport(_) => StatusCode::BAD_GATEWAY,
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}
