//! One user's live session: a transport plus the event task that owns its
//! lifecycle phase.
//!
//! Every lifecycle event flows through a single per-session task, so phase
//! transitions are serialized without any lock shared across sessions. The
//! current phase is published through a `watch` channel: reads are wait-free
//! and never touch the event path.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use courier_domain::{Error, Result, UserId};
use courier_protocol::{Contact, LifecycleEvent};
use courier_transport::Transport;

use crate::notify::{SessionNotice, SessionNotifier};
use crate::pairing::PairingRenderer;
use crate::phase::{self, Phase};

/// Request from a session to be evicted from the registry. Carries the
/// session identity so a stale request can never evict a successor session
/// for the same user.
#[derive(Debug)]
pub(crate) struct Eviction {
    pub user: UserId,
    pub ident: Uuid,
}

/// Everything needed to spawn a session's event task.
pub(crate) struct SessionSeed {
    pub user: UserId,
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<LifecycleEvent>,
    pub renderer: Arc<dyn PairingRenderer>,
    pub notifier: SessionNotifier,
    pub evictions: mpsc::UnboundedSender<Eviction>,
}

pub struct Session {
    user: UserId,
    ident: Uuid,
    created_at: DateTime<Utc>,
    transport: Arc<dyn Transport>,
    phase: watch::Receiver<Phase>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn spawn(seed: SessionSeed) -> Arc<Self> {
        let ident = Uuid::new_v4();
        let (phase_tx, phase_rx) = watch::channel(Phase::Starting);

        let event_loop = EventLoop {
            user: seed.user.clone(),
            ident,
            // Weak: the strong references live in the `Session` and in the
            // transport's own event sink. Dropping the session closes the
            // event channel and ends the task.
            transport: Arc::downgrade(&seed.transport),
            phase_tx,
            renderer: seed.renderer,
            notifier: seed.notifier,
            evictions: seed.evictions,
        };
        let task = tokio::spawn(event_loop.run(seed.events));

        Arc::new(Self {
            user: seed.user,
            ident,
            created_at: Utc::now(),
            transport: seed.transport,
            phase: phase_rx,
            task: parking_lot::Mutex::new(Some(task)),
        })
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("ident", &self.ident)
            .field("created_at", &self.created_at)
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

impl Session {

    /// Identity of this session instance (not the user). Used to guard
    /// registry eviction against replacement races.
    pub(crate) fn ident(&self) -> Uuid {
        self.ident
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle phase. Pure read.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Deliver one outbound message. Accepted only in `Ready`; any other
    /// phase fails fast with `NotReady` instead of queuing, so a message is
    /// never silently dropped into a half-open connection.
    pub async fn send(&self, to: &str, body: &str) -> Result<()> {
        self.ensure_ready()?;
        self.transport.send_message(to, body).await
    }

    /// Resolve a recipient on the protocol. Gated on `Ready` like `send`.
    pub async fn lookup_contact(&self, id: &str) -> Result<Option<Contact>> {
        self.ensure_ready()?;
        self.transport.lookup_contact(id).await
    }

    fn ensure_ready(&self) -> Result<()> {
        let phase = self.phase();
        if phase != Phase::Ready {
            return Err(Error::NotReady {
                phase: phase.to_string(),
            });
        }
        Ok(())
    }

    /// Give the transport a chance to persist its latest record and release
    /// resources, then stop the event task. Best-effort.
    pub(crate) async fn teardown(&self) {
        self.transport.shutdown().await;
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

/// The per-session event loop: consumes transport lifecycle events one at a
/// time and applies transitions plus their side effects.
struct EventLoop {
    user: UserId,
    ident: Uuid,
    transport: Weak<dyn Transport>,
    phase_tx: watch::Sender<Phase>,
    renderer: Arc<dyn PairingRenderer>,
    notifier: SessionNotifier,
    evictions: mpsc::UnboundedSender<Eviction>,
}

impl EventLoop {
    async fn run(self, mut events: mpsc::UnboundedReceiver<LifecycleEvent>) {
        while let Some(event) = events.recv().await {
            let current = *self.phase_tx.borrow();
            let Some(next) = phase::next(current, &event) else {
                tracing::debug!(
                    user = %self.user,
                    phase = %current,
                    event = ?event,
                    "ignoring out-of-order lifecycle event"
                );
                continue;
            };

            tracing::info!(user = %self.user, from = %current, to = %next, "session transition");
            let _ = self.phase_tx.send(next);

            match event {
                LifecycleEvent::PairingCode { payload } => self.on_pairing_code(&payload),
                LifecycleEvent::Authenticated => {
                    // Snapshot immediately so the pairing survives a crash.
                    if let Some(transport) = self.transport.upgrade() {
                        transport.flush_record().await;
                    }
                }
                LifecycleEvent::Ready => {
                    self.notifier.publish(SessionNotice::Ready {
                        user: self.user.clone(),
                    });
                }
                LifecycleEvent::AuthFailure { reason } => {
                    // The session stays registered but unusable; the caller
                    // must remove it and initialize a fresh one.
                    self.notifier.publish(SessionNotice::AuthFailed {
                        user: self.user.clone(),
                        reason,
                    });
                }
                LifecycleEvent::Disconnected { reason } => {
                    self.notifier.publish(SessionNotice::Disconnected {
                        user: self.user.clone(),
                        reason,
                    });
                    break;
                }
            }
        }

        // Terminal phase (or a dropped transport) ends the loop. Hand the
        // registry an eviction request; it is ignored there unless this is
        // still the mapped session for the user.
        if *self.phase_tx.borrow() == Phase::Disconnected {
            let _ = self.evictions.send(Eviction {
                user: self.user,
                ident: self.ident,
            });
        }
    }

    fn on_pairing_code(&self, payload: &str) {
        match self.renderer.render(payload) {
            Ok(code) => self.notifier.publish(SessionNotice::PairingCode {
                user: self.user.clone(),
                code,
            }),
            Err(e) => {
                tracing::warn!(user = %self.user, error = %e, "pairing code render failed")
            }
        }
    }
}
