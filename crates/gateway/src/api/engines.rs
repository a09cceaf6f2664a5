use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// GET /v1/engines — list attached protocol engines.
pub async fn list_engines(State(state): State<AppState>) -> impl IntoResponse {
    let engines = state.engines.list();
    Json(serde_json::json!({
        "engines": engines,
        "count": engines.len(),
    }))
}
