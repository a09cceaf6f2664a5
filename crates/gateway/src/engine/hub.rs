//! Hub of attached protocol engines.
//!
//! Tracks which engine serves which user, forwards lifecycle events from
//! engines into the owning session's event sink, and correlates
//! request/response round-trips (send, contact lookup) by request id.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use courier_domain::{Error, Result, UserId};
use courier_protocol::{Contact, EngineMessage, LifecycleEvent};
use courier_transport::EventSink;

/// Channel the hub pushes messages to an engine's WebSocket writer through.
pub type EngineSink = mpsc::Sender<EngineMessage>;

/// In-flight request bounds, preventing one wedged engine from pinning
/// memory for the whole process.
const MAX_PENDING_PER_USER: usize = 32;
const MAX_PENDING_GLOBAL: usize = 256;

/// Lifecycle events an engine emitted before its session was bound are kept
/// until the session core catches up (an engine may attach and resume
/// before the user calls initialize). Only the tail matters.
const MAX_EVENT_BACKLOG: usize = 8;

/// One attached engine connection.
pub struct AttachedEngine {
    pub conn_id: Uuid,
    pub user: UserId,
    pub engine_version: String,
    pub attached_at: DateTime<Utc>,
    pub sink: EngineSink,
}

/// Summary info returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub user: UserId,
    pub engine_version: String,
    pub attached_at: DateTime<Utc>,
}

/// Reply to a correlated engine request.
#[derive(Debug)]
pub enum EngineReply {
    Send {
        delivered: bool,
        error: Option<String>,
    },
    Contact {
        contact: Option<Contact>,
        error: Option<String>,
    },
}

struct PendingRequest {
    user: UserId,
    tx: oneshot::Sender<EngineReply>,
}

pub struct EngineHub {
    engines: Mutex<HashMap<UserId, AttachedEngine>>,
    /// Per-user event sinks of live sessions.
    bindings: Mutex<HashMap<UserId, EventSink>>,
    /// Events received for users with no bound session yet.
    backlog: Mutex<HashMap<UserId, VecDeque<LifecycleEvent>>>,
    /// request_id → waiting caller.
    pending: Mutex<HashMap<String, PendingRequest>>,
    request_timeout: Duration,
}

impl EngineHub {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            engines: Mutex::new(HashMap::new()),
            bindings: Mutex::new(HashMap::new()),
            backlog: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            request_timeout,
        }
    }

    // ── Engine connections ──────────────────────────────────────────

    /// Register an engine connection. Replaces any engine already attached
    /// for the same user (reconnect scenario).
    pub fn attach(&self, engine: AttachedEngine) {
        tracing::info!(
            user = %engine.user,
            engine_version = %engine.engine_version,
            "engine attached"
        );
        self.engines.lock().insert(engine.user.clone(), engine);
    }

    /// Remove an engine connection, but only when `conn_id` still names the
    /// attached connection — a stale close racing a reconnect must neither
    /// drop the replacement nor fail its in-flight requests. Requests that
    /// went to the dead socket run into the request timeout instead.
    pub fn detach(&self, user: &UserId, conn_id: Uuid) {
        let removed = {
            let mut engines = self.engines.lock();
            match engines.get(user) {
                Some(current) if current.conn_id == conn_id => {
                    engines.remove(user);
                    true
                }
                _ => false,
            }
        };
        if removed {
            let failed = self.fail_pending_for_user(user);
            tracing::info!(user = %user, failed_in_flight = failed, "engine detached");
        }
    }

    pub fn is_attached(&self, user: &UserId) -> bool {
        self.engines.lock().contains_key(user)
    }

    pub fn sink_for(&self, user: &UserId) -> Option<EngineSink> {
        self.engines.lock().get(user).map(|e| e.sink.clone())
    }

    /// List all attached engines.
    pub fn list(&self) -> Vec<EngineInfo> {
        self.engines
            .lock()
            .values()
            .map(|e| EngineInfo {
                user: e.user.clone(),
                engine_version: e.engine_version.clone(),
                attached_at: e.attached_at,
            })
            .collect()
    }

    // ── Session bindings ────────────────────────────────────────────

    /// Route a user's lifecycle events into the given session sink, and
    /// replay anything the engine emitted before the session existed.
    pub fn bind_session(&self, user: &UserId, events: EventSink) {
        let replay = self
            .backlog
            .lock()
            .remove(user)
            .unwrap_or_default();
        for event in replay {
            let _ = events.send(event);
        }
        self.bindings.lock().insert(user.clone(), events);
    }

    /// Drop a user's session binding (transport teardown). Pending backlog
    /// is discarded with it.
    pub fn unbind_session(&self, user: &UserId) {
        self.bindings.lock().remove(user);
        self.backlog.lock().remove(user);
    }

    /// Deliver a lifecycle event to the user's session, or hold it in the
    /// bounded backlog until one is bound.
    pub fn forward_event(&self, user: &UserId, event: LifecycleEvent) {
        let event = {
            let bindings = self.bindings.lock();
            match bindings.get(user) {
                Some(sink) => match sink.send(event) {
                    Ok(()) => return,
                    // Session task is gone; keep the event so a successor
                    // session still observes the latest state.
                    Err(err) => err.0,
                },
                None => event,
            }
        };
        let mut backlog = self.backlog.lock();
        let queue = backlog.entry(user.clone()).or_default();
        if queue.len() == MAX_EVENT_BACKLOG {
            queue.pop_front();
        }
        queue.push_back(event);
    }

    // ── Correlated requests ─────────────────────────────────────────

    /// Send a request to the user's engine and wait for its reply.
    ///
    /// `build` receives the generated request id and produces the wire
    /// message. Bounded pending and a timeout keep a wedged engine from
    /// stalling callers forever.
    pub async fn request(
        &self,
        user: &UserId,
        build: impl FnOnce(String) -> EngineMessage,
    ) -> Result<EngineReply> {
        {
            let pending = self.pending.lock();
            if pending.len() >= MAX_PENDING_GLOBAL {
                return Err(Error::Transport(format!(
                    "global pending limit reached ({} requests in-flight)",
                    pending.len()
                )));
            }
            let user_count = pending.values().filter(|p| &p.user == user).count();
            if user_count >= MAX_PENDING_PER_USER {
                return Err(Error::Transport(format!(
                    "pending limit reached ({user_count} requests in-flight for {user})"
                )));
            }
        }

        let sink = self
            .sink_for(user)
            .ok_or_else(|| Error::Transport(format!("no engine attached for {user}")))?;

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            request_id.clone(),
            PendingRequest {
                user: user.clone(),
                tx,
            },
        );

        if sink.send(build(request_id.clone())).await.is_err() {
            self.pending.lock().remove(&request_id);
            return Err(Error::Transport(format!(
                "engine connection for {user} closed"
            )));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Transport(format!(
                "engine for {user} detached before responding"
            ))),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(Error::Transport(format!(
                    "engine request for {user} timed out after {}s",
                    self.request_timeout.as_secs()
                )))
            }
        }
    }

    /// Fire a message at the user's engine without waiting for anything.
    /// Returns whether an engine was there to receive it.
    pub async fn push(&self, user: &UserId, msg: EngineMessage) -> bool {
        match self.sink_for(user) {
            Some(sink) => sink.send(msg).await.is_ok(),
            None => false,
        }
    }

    /// Called by the WS handler when an engine answers a request.
    pub fn complete(&self, request_id: &str, reply: EngineReply) {
        if let Some(pending) = self.pending.lock().remove(request_id) {
            let _ = pending.tx.send(reply);
        } else {
            tracing::warn!(request_id = %request_id, "reply for unknown request");
        }
    }

    /// Fail all in-flight requests for a user (engine detached). Returns
    /// the number of requests failed.
    pub fn fail_pending_for_user(&self, user: &UserId) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| &p.user == user)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id))
                .collect()
        };

        let count = drained.len();
        for request in drained {
            let _ = request.tx.send(EngineReply::Send {
                delivered: false,
                error: Some("engine detached".into()),
            });
        }
        if count > 0 {
            tracing::warn!(user = %user, failed = count, "failed in-flight engine requests");
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn attach(hub: &EngineHub, u: &UserId) -> (Uuid, mpsc::Receiver<EngineMessage>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(16);
        hub.attach(AttachedEngine {
            conn_id,
            user: u.clone(),
            engine_version: "0.1.0".into(),
            attached_at: Utc::now(),
            sink: tx,
        });
        (conn_id, rx)
    }

    #[tokio::test]
    async fn request_completes_through_hub() {
        let hub = EngineHub::new(Duration::from_secs(5));
        let u = user("u1");
        let (_, mut engine_rx) = attach(&hub, &u);

        let hub = Arc::new(hub);
        let hub2 = hub.clone();
        let u2 = u.clone();
        let caller = tokio::spawn(async move {
            hub2.request(&u2, |id| EngineMessage::SendRequest {
                request_id: id,
                to: "123@c.us".into(),
                body: "hi".into(),
            })
            .await
        });

        // Play the engine: answer the request we receive.
        let request_id = match engine_rx.recv().await.unwrap() {
            EngineMessage::SendRequest { request_id, .. } => request_id,
            other => panic!("unexpected: {other:?}"),
        };
        hub.complete(
            &request_id,
            EngineReply::Send {
                delivered: true,
                error: None,
            },
        );

        match caller.await.unwrap().unwrap() {
            EngineReply::Send { delivered, .. } => assert!(delivered),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(hub.pending_count(), 0);
    }

    #[tokio::test]
    async fn request_without_engine_fails_fast() {
        let hub = EngineHub::new(Duration::from_secs(5));
        let err = hub
            .request(&user("nobody"), |id| EngineMessage::ContactRequest {
                request_id: id,
                contact_id: "123@c.us".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(hub.pending_count(), 0);
    }

    #[tokio::test]
    async fn detach_fails_in_flight_requests() {
        let hub = Arc::new(EngineHub::new(Duration::from_secs(5)));
        let u = user("u1");
        let (conn_id, _engine_rx) = attach(&hub, &u);

        let hub2 = hub.clone();
        let u2 = u.clone();
        let caller = tokio::spawn(async move {
            hub2.request(&u2, |id| EngineMessage::ContactRequest {
                request_id: id,
                contact_id: "123@c.us".into(),
            })
            .await
        });

        // Let the request register, then drop the engine.
        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.detach(&u, conn_id);

        let reply = caller.await.unwrap().unwrap();
        match reply {
            EngineReply::Send { delivered, error } => {
                assert!(!delivered);
                assert!(error.unwrap().contains("detached"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(hub.pending_count(), 0);
    }

    #[tokio::test]
    async fn stale_detach_leaves_replacement_attached() {
        let hub = EngineHub::new(Duration::from_secs(5));
        let u = user("u1");
        let (old_conn, _rx1) = attach(&hub, &u);
        let (_new_conn, _rx2) = attach(&hub, &u);

        // The old connection's cleanup must not remove the replacement.
        hub.detach(&u, old_conn);
        assert!(hub.is_attached(&u));
    }

    #[tokio::test]
    async fn events_before_binding_are_replayed_in_order() {
        let hub = EngineHub::new(Duration::from_secs(5));
        let u = user("u1");

        hub.forward_event(
            &u,
            LifecycleEvent::Authenticated,
        );
        hub.forward_event(&u, LifecycleEvent::Ready);

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.bind_session(&u, tx);

        assert!(matches!(rx.try_recv(), Ok(LifecycleEvent::Authenticated)));
        assert!(matches!(rx.try_recv(), Ok(LifecycleEvent::Ready)));
        assert!(rx.try_recv().is_err());

        // Bound now: events go straight through.
        hub.forward_event(
            &u,
            LifecycleEvent::Disconnected {
                reason: "logout".into(),
            },
        );
        assert!(matches!(
            rx.try_recv(),
            Ok(LifecycleEvent::Disconnected { .. })
        ));
    }

    #[tokio::test]
    async fn backlog_is_bounded_to_the_tail() {
        let hub = EngineHub::new(Duration::from_secs(5));
        let u = user("u1");

        for i in 0..(MAX_EVENT_BACKLOG + 3) {
            hub.forward_event(
                &u,
                LifecycleEvent::PairingCode {
                    payload: format!("2@{i}"),
                },
            );
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.bind_session(&u, tx);

        let mut replayed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            replayed.push(event);
        }
        assert_eq!(replayed.len(), MAX_EVENT_BACKLOG);
        match replayed.last().unwrap() {
            LifecycleEvent::PairingCode { payload } => {
                assert_eq!(payload, &format!("2@{}", MAX_EVENT_BACKLOG + 2));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
