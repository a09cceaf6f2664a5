//! Lifecycle event push (SSE).
//!
//! Replaces a stateful socket push with server-sent events: clients
//! subscribe and receive pairing codes, readiness, auth failures and
//! disconnects as they happen. Fire-and-forget on the session side — a slow
//! or absent client never backpressures a transition.

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use futures_util::stream::Stream;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Restrict the stream to one user's notices.
    pub user: Option<String>,
}

/// GET /v1/sessions/events (SSE)
pub async fn session_events_sse(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let mut rx = state.sessions.subscribe();
    let filter = query.user;

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(notice) => {
                    if let Some(user) = &filter {
                        if notice.user().as_str() != user {
                            continue;
                        }
                    }
                    if let Ok(json) = serde_json::to_string(&notice) {
                        yield Ok(Event::default().event(notice.kind()).data(json));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    };

    Sse::new(stream)
}
