//! Lifecycle notice fan-out.
//!
//! Sessions publish notices as they move through their lifecycle; the HTTP
//! layer's SSE endpoint subscribes and pushes them to clients. Delivery is
//! fire-and-forget: no subscriber, a lagging subscriber, or a full channel
//! never blocks or fails a session transition.

use serde::Serialize;
use tokio::sync::broadcast;

use courier_domain::UserId;

/// Channel capacity. Lifecycle events are rare; a subscriber that lags this
/// far behind only loses the oldest notices.
const CHANNEL_CAPACITY: usize = 64;

/// A lifecycle notice, keyed by the user it concerns.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionNotice {
    /// A rendered pairing code the user must acknowledge out-of-band.
    PairingCode { user: UserId, code: String },
    Ready { user: UserId },
    AuthFailed { user: UserId, reason: String },
    Disconnected { user: UserId, reason: String },
}

impl SessionNotice {
    /// Stable event name, used as the SSE event type.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionNotice::PairingCode { .. } => "session.pairing_code",
            SessionNotice::Ready { .. } => "session.ready",
            SessionNotice::AuthFailed { .. } => "session.auth_failed",
            SessionNotice::Disconnected { .. } => "session.disconnected",
        }
    }

    pub fn user(&self) -> &UserId {
        match self {
            SessionNotice::PairingCode { user, .. }
            | SessionNotice::Ready { user }
            | SessionNotice::AuthFailed { user, .. }
            | SessionNotice::Disconnected { user, .. } => user,
        }
    }
}

/// Fan-out point for [`SessionNotice`]s. Cheap to clone.
#[derive(Clone)]
pub struct SessionNotifier {
    tx: broadcast::Sender<SessionNotice>,
}

impl Default for SessionNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish a notice. Succeeds regardless of subscriber presence.
    pub fn publish(&self, notice: SessionNotice) {
        tracing::debug!(
            user = %notice.user(),
            kind = notice.kind(),
            "lifecycle notice"
        );
        let _ = self.tx.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new("u1").unwrap()
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let notifier = SessionNotifier::new();
        notifier.publish(SessionNotice::Ready { user: user() });
    }

    #[tokio::test]
    async fn subscriber_receives_notice() {
        let notifier = SessionNotifier::new();
        let mut rx = notifier.subscribe();
        notifier.publish(SessionNotice::AuthFailed {
            user: user(),
            reason: "rejected".into(),
        });
        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.kind(), "session.auth_failed");
        assert_eq!(notice.user().as_str(), "u1");
    }

    #[test]
    fn notices_serialize_with_type_tag() {
        let json = serde_json::to_string(&SessionNotice::PairingCode {
            user: user(),
            code: "2@x".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"pairing_code\""));
        assert!(json.contains("\"user\":\"u1\""));
    }
}
