use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable resumption payload for one user's session.
///
/// The payload is produced and consumed only by the transport engine's
/// persistence hook; Courier treats it as an opaque blob. At most one record
/// exists per user and saves are last-write-wins: resumption only needs the
/// most recent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque engine-defined payload.
    pub payload: serde_json::Value,
    pub saved_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            saved_at: Utc::now(),
        }
    }
}
