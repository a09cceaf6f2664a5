//! `Transport` implementation backed by an attached protocol engine.
//!
//! The bridge is passive on the connection side: engines dial in over
//! WebSocket, so `initialize` has nothing to drive — a session created
//! before its engine attaches simply stays in `Starting` until events
//! arrive. Send and lookup are correlated request/response round-trips
//! through the [`EngineHub`].

use std::sync::Arc;

use async_trait::async_trait;

use courier_domain::{Error, Result, UserId};
use courier_protocol::{Contact, EngineMessage};
use courier_transport::{Transport, TransportContext, TransportFactory};

use super::hub::{EngineHub, EngineReply};

pub struct BridgeTransport {
    user: UserId,
    hub: Arc<EngineHub>,
}

#[async_trait]
impl Transport for BridgeTransport {
    fn initialize(&self) {
        if self.hub.is_attached(&self.user) {
            tracing::debug!(user = %self.user, "engine already attached");
        } else {
            tracing::debug!(user = %self.user, "waiting for engine attach");
        }
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<()> {
        let reply = self
            .hub
            .request(&self.user, |request_id| EngineMessage::SendRequest {
                request_id,
                to: to.to_string(),
                body: body.to_string(),
            })
            .await?;

        match reply {
            EngineReply::Send {
                delivered: true, ..
            } => Ok(()),
            EngineReply::Send { error, .. } => Err(Error::Transport(
                error.unwrap_or_else(|| "send rejected by engine".into()),
            )),
            EngineReply::Contact { .. } => {
                Err(Error::Transport("mismatched engine reply".into()))
            }
        }
    }

    async fn lookup_contact(&self, id: &str) -> Result<Option<Contact>> {
        let reply = self
            .hub
            .request(&self.user, |request_id| EngineMessage::ContactRequest {
                request_id,
                contact_id: id.to_string(),
            })
            .await?;

        match reply {
            EngineReply::Contact {
                error: Some(e), ..
            } => Err(Error::Transport(e)),
            EngineReply::Contact { contact, .. } => Ok(contact),
            EngineReply::Send { error, .. } => Err(Error::Transport(
                error.unwrap_or_else(|| "mismatched engine reply".into()),
            )),
        }
    }

    async fn flush_record(&self) {
        if !self.hub.push(&self.user, EngineMessage::RecordRequest {}).await {
            tracing::debug!(user = %self.user, "no engine attached, snapshot request dropped");
        }
    }

    async fn shutdown(&self) {
        // Best-effort: the engine persists a final record on shutdown;
        // nothing waits on it.
        self.hub.push(&self.user, EngineMessage::Shutdown {}).await;
        self.hub.unbind_session(&self.user);
        tracing::debug!(user = %self.user, "bridge transport shut down");
    }
}

/// Builds [`BridgeTransport`]s and routes the session's event sink into the
/// hub.
///
/// The context's record store and save interval are not used here: engine
/// `record_save` frames are persisted by the WS handler, and the interval
/// floor travels in the welcome frame. The resume record is likewise served
/// at attach time, so an engine reconnecting long after session creation
/// still receives the latest snapshot.
pub struct BridgeFactory {
    hub: Arc<EngineHub>,
}

impl BridgeFactory {
    pub fn new(hub: Arc<EngineHub>) -> Self {
        Self { hub }
    }
}

impl TransportFactory for BridgeFactory {
    fn create(&self, ctx: TransportContext) -> Result<Arc<dyn Transport>> {
        self.hub.bind_session(&ctx.user, ctx.events);
        Ok(Arc::new(BridgeTransport {
            user: ctx.user,
            hub: self.hub.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use courier_transport::scripted::MemoryRecordStore;

    use crate::engine::hub::AttachedEngine;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn bridge(
        hub: &Arc<EngineHub>,
        u: &UserId,
    ) -> (Arc<dyn Transport>, mpsc::UnboundedReceiver<courier_protocol::LifecycleEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let factory = BridgeFactory::new(hub.clone());
        let transport = factory
            .create(TransportContext {
                user: u.clone(),
                resume: None,
                events: events_tx,
                records: Arc::new(MemoryRecordStore::new()),
                min_save_interval: Duration::from_secs(60),
            })
            .unwrap();
        (transport, events_rx)
    }

    /// Attach a fake engine that answers every request with `respond`.
    fn attach_engine(
        hub: &Arc<EngineHub>,
        u: &UserId,
        respond: impl Fn(EngineMessage) -> Option<(String, EngineReply)> + Send + 'static,
    ) {
        let (tx, mut rx) = mpsc::channel(16);
        hub.attach(AttachedEngine {
            conn_id: Uuid::new_v4(),
            user: u.clone(),
            engine_version: "0.1.0".into(),
            attached_at: Utc::now(),
            sink: tx,
        });
        let hub = hub.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Some((request_id, reply)) = respond(msg) {
                    hub.complete(&request_id, reply);
                }
            }
        });
    }

    #[tokio::test]
    async fn send_round_trip() {
        let hub = Arc::new(EngineHub::new(Duration::from_secs(5)));
        let u = user("u1");
        let (transport, _events) = bridge(&hub, &u);

        attach_engine(&hub, &u, |msg| match msg {
            EngineMessage::SendRequest { request_id, .. } => Some((
                request_id,
                EngineReply::Send {
                    delivered: true,
                    error: None,
                },
            )),
            _ => None,
        });

        transport.send_message("123@c.us", "hi").await.unwrap();
    }

    #[tokio::test]
    async fn engine_send_failure_surfaces_as_transport_error() {
        let hub = Arc::new(EngineHub::new(Duration::from_secs(5)));
        let u = user("u1");
        let (transport, _events) = bridge(&hub, &u);

        attach_engine(&hub, &u, |msg| match msg {
            EngineMessage::SendRequest { request_id, .. } => Some((
                request_id,
                EngineReply::Send {
                    delivered: false,
                    error: Some("rate limited".into()),
                },
            )),
            _ => None,
        });

        let err = transport.send_message("123@c.us", "hi").await.unwrap_err();
        match err {
            Error::Transport(message) => assert!(message.contains("rate limited")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn lookup_distinguishes_unknown_contact_from_errors() {
        let hub = Arc::new(EngineHub::new(Duration::from_secs(5)));
        let u = user("u1");
        let (transport, _events) = bridge(&hub, &u);

        attach_engine(&hub, &u, |msg| match msg {
            EngineMessage::ContactRequest {
                request_id,
                contact_id,
            } => {
                let contact = (contact_id == "123@c.us").then(|| Contact {
                    id: contact_id,
                    registered: true,
                });
                Some((
                    request_id,
                    EngineReply::Contact {
                        contact,
                        error: None,
                    },
                ))
            }
            _ => None,
        });

        let found = transport.lookup_contact("123@c.us").await.unwrap();
        assert!(found.is_some_and(|c| c.registered));

        let missing = transport.lookup_contact("999@c.us").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn send_without_engine_is_a_transport_error() {
        let hub = Arc::new(EngineHub::new(Duration::from_secs(5)));
        let u = user("u1");
        let (transport, _events) = bridge(&hub, &u);

        let err = transport.send_message("123@c.us", "hi").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn shutdown_unbinds_the_session() {
        let hub = Arc::new(EngineHub::new(Duration::from_secs(5)));
        let u = user("u1");
        let (transport, mut events) = bridge(&hub, &u);

        transport.shutdown().await;

        // Events after shutdown land in the backlog, not the old sink.
        hub.forward_event(&u, courier_protocol::LifecycleEvent::Ready);
        assert!(events.try_recv().is_err());
    }
}
