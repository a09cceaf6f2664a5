//! Session lifecycle phases and the legal transitions between them.

use serde::{Deserialize, Serialize};
use std::fmt;

use courier_protocol::LifecycleEvent;

/// A session's position in its lifecycle.
///
/// `Disconnected` is terminal. `AuthFailed` is not: the session stays
/// registered (so its status remains observable) but is unusable until it is
/// explicitly removed and a new one is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    AwaitingPairing,
    Authenticated,
    Ready,
    AuthFailed,
    Disconnected,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::AwaitingPairing => "awaiting_pairing",
            Phase::Authenticated => "authenticated",
            Phase::Ready => "ready",
            Phase::AuthFailed => "auth_failed",
            Phase::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The phase `event` moves `current` to, or `None` when the event does not
/// apply (out-of-order or duplicate events are ignored, not errors).
///
/// `Authenticated` is accepted straight from `Starting` as well as from
/// `AwaitingPairing`: a transport resuming from a stored record
/// authenticates without ever issuing a pairing code.
pub fn next(current: Phase, event: &LifecycleEvent) -> Option<Phase> {
    use LifecycleEvent as E;
    use Phase as P;

    match (current, event) {
        (P::Starting, E::PairingCode { .. }) => Some(P::AwaitingPairing),
        (P::Starting | P::AwaitingPairing, E::Authenticated) => Some(P::Authenticated),
        (P::Authenticated, E::Ready) => Some(P::Ready),
        // Auth rejection can arrive at any point before teardown.
        (
            P::Starting | P::AwaitingPairing | P::Authenticated | P::Ready,
            E::AuthFailure { .. },
        ) => Some(P::AuthFailed),
        // Terminal, reachable from any non-Starting phase.
        (
            P::AwaitingPairing | P::Authenticated | P::Ready | P::AuthFailed,
            E::Disconnected { .. },
        ) => Some(P::Disconnected),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairing() -> LifecycleEvent {
        LifecycleEvent::PairingCode {
            payload: "2@x".into(),
        }
    }

    fn disconnect() -> LifecycleEvent {
        LifecycleEvent::Disconnected {
            reason: "logout".into(),
        }
    }

    #[test]
    fn happy_path() {
        let mut phase = Phase::Starting;
        for (event, expected) in [
            (pairing(), Phase::AwaitingPairing),
            (LifecycleEvent::Authenticated, Phase::Authenticated),
            (LifecycleEvent::Ready, Phase::Ready),
        ] {
            phase = next(phase, &event).unwrap();
            assert_eq!(phase, expected);
        }
    }

    #[test]
    fn resume_skips_pairing() {
        assert_eq!(
            next(Phase::Starting, &LifecycleEvent::Authenticated),
            Some(Phase::Authenticated)
        );
    }

    #[test]
    fn auth_failure_from_any_live_phase() {
        let failure = LifecycleEvent::AuthFailure {
            reason: "rejected".into(),
        };
        for phase in [
            Phase::Starting,
            Phase::AwaitingPairing,
            Phase::Authenticated,
            Phase::Ready,
        ] {
            assert_eq!(next(phase, &failure), Some(Phase::AuthFailed));
        }
        assert_eq!(next(Phase::Disconnected, &failure), None);
    }

    #[test]
    fn disconnect_is_terminal_and_not_reachable_from_starting() {
        assert_eq!(next(Phase::Starting, &disconnect()), None);
        for phase in [
            Phase::AwaitingPairing,
            Phase::Authenticated,
            Phase::Ready,
            Phase::AuthFailed,
        ] {
            assert_eq!(next(phase, &disconnect()), Some(Phase::Disconnected));
        }
        assert_eq!(next(Phase::Disconnected, &disconnect()), None);
    }

    #[test]
    fn out_of_order_events_are_ignored() {
        assert_eq!(next(Phase::Starting, &LifecycleEvent::Ready), None);
        assert_eq!(next(Phase::Ready, &pairing()), None);
        assert_eq!(next(Phase::Ready, &LifecycleEvent::Authenticated), None);
        assert_eq!(next(Phase::AuthFailed, &LifecycleEvent::Ready), None);
    }
}
