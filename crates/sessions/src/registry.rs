//! Process-wide registry of live sessions.
//!
//! One entry per user, created on first initialization and removed on
//! explicit disconnect, transport-reported disconnect, or shutdown. The
//! create path gives a create-or-join-in-flight guarantee: concurrent first
//! calls for one user construct exactly one transport, with every caller
//! observing the same session.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, OnceCell};
use uuid::Uuid;

use courier_domain::{Result, UserId};
use courier_transport::{RecordStore, TransportContext, TransportFactory};

use crate::notify::SessionNotifier;
use crate::pairing::PairingRenderer;
use crate::phase::Phase;
use crate::session::{Eviction, Session, SessionSeed};

/// Upper bound on a single session's teardown during shutdown drain.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// One user's slot in the registry. The cell is inserted before creation
/// runs, so a concurrent caller joins the in-flight creation instead of
/// racing a second transport into existence.
type SessionCell = Arc<OnceCell<Arc<Session>>>;

/// Summary info returned by list/status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub user: UserId,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
}

pub struct SessionRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: Mutex<HashMap<UserId, SessionCell>>,
    factory: Arc<dyn TransportFactory>,
    records: Arc<dyn RecordStore>,
    renderer: Arc<dyn PairingRenderer>,
    notifier: SessionNotifier,
    min_save_interval: Duration,
    evictions: mpsc::UnboundedSender<Eviction>,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        records: Arc<dyn RecordStore>,
        renderer: Arc<dyn PairingRenderer>,
        notifier: SessionNotifier,
        min_save_interval: Duration,
    ) -> Self {
        let (evictions_tx, evictions_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            sessions: Mutex::new(HashMap::new()),
            factory,
            records,
            renderer,
            notifier,
            min_save_interval,
            evictions: evictions_tx,
        });
        tokio::spawn(run_janitor(Arc::downgrade(&inner), evictions_rx));
        Self { inner }
    }

    pub fn notifier(&self) -> &SessionNotifier {
        &self.inner.notifier
    }

    /// Return the user's live session, creating it if none exists.
    ///
    /// The boolean is `true` for the caller whose invocation actually
    /// constructed the session. Creation loads the stored record, builds the
    /// transport and fires its initialization without waiting for pairing or
    /// readiness; a store or factory failure aborts the attempt and leaves
    /// nothing registered.
    pub async fn get_or_create(&self, user: &UserId) -> Result<(Arc<Session>, bool)> {
        loop {
            let cell = {
                let mut sessions = self.inner.sessions.lock();
                sessions
                    .entry(user.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            };

            let mut created = false;
            let result = cell
                .get_or_try_init(|| {
                    created = true;
                    self.inner.create_session(user)
                })
                .await;

            let session = match result {
                Ok(session) => session.clone(),
                Err(e) => {
                    // Drop the placeholder so a later call can retry, but
                    // only if it is still ours and still empty (a concurrent
                    // caller may have initialized it meanwhile).
                    let mut sessions = self.inner.sessions.lock();
                    if let Some(current) = sessions.get(user) {
                        if Arc::ptr_eq(current, &cell) && current.get().is_none() {
                            sessions.remove(user);
                        }
                    }
                    return Err(e);
                }
            };

            if session.phase() == Phase::Disconnected {
                // Dead entry whose eviction has not landed yet; clear it and
                // construct a fresh session on the next pass.
                if let Some(stale) = self.inner.take_if_current(user, session.ident()) {
                    stale.teardown().await;
                }
                continue;
            }

            return Ok((session, created));
        }
    }

    /// Pure lookup. A session that already reported `Disconnected` is
    /// treated as gone even while its eviction is still in flight.
    pub fn get(&self, user: &UserId) -> Option<Arc<Session>> {
        let session = self.get_any(user)?;
        if session.phase() == Phase::Disconnected {
            return None;
        }
        Some(session)
    }

    /// Raw lookup, including a disconnected session whose eviction has not
    /// landed yet. Status reads use this so callers observe the
    /// `disconnected` phase instead of an abrupt not-found.
    pub fn get_any(&self, user: &UserId) -> Option<Arc<Session>> {
        let cell = self.inner.sessions.lock().get(user).cloned()?;
        cell.get().cloned()
    }

    /// Tear down and evict the user's session. No-op when absent.
    pub async fn remove(&self, user: &UserId) {
        let cell = self.inner.sessions.lock().remove(user);
        let Some(cell) = cell else { return };
        if let Some(session) = cell.get() {
            session.teardown().await;
            tracing::info!(user = %user, "session removed");
        }
    }

    /// Summaries of all registered sessions.
    pub fn list(&self) -> Vec<SessionSummary> {
        let cells: Vec<SessionCell> = self.inner.sessions.lock().values().cloned().collect();
        cells
            .iter()
            .filter_map(|cell| cell.get())
            .map(|s| SessionSummary {
                user: s.user().clone(),
                phase: s.phase(),
                created_at: s.created_at(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.lock().is_empty()
    }

    /// Best-effort drain: every live transport gets a bounded chance to
    /// persist its latest record and release resources before exit.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.inner.sessions.lock();
            map.drain()
                .filter_map(|(_, cell)| cell.get().cloned())
                .collect()
        };
        tracing::info!(count = sessions.len(), "draining session registry");

        for session in sessions {
            if tokio::time::timeout(TEARDOWN_TIMEOUT, session.teardown())
                .await
                .is_err()
            {
                tracing::warn!(user = %session.user(), "session teardown timed out");
            }
        }
        tracing::info!("session registry shutdown complete");
    }
}

impl Inner {
    async fn create_session(&self, user: &UserId) -> Result<Arc<Session>> {
        // A store failure here is fatal to the creation attempt: nothing is
        // registered and the error surfaces to the caller.
        let resume = self.records.load(user).await?;
        let resumed = resume.is_some();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = self.factory.create(TransportContext {
            user: user.clone(),
            resume,
            events: events_tx,
            records: self.records.clone(),
            min_save_interval: self.min_save_interval,
        })?;

        // Fire-and-forget: pairing and readiness arrive as lifecycle events.
        transport.initialize();

        let session = Session::spawn(SessionSeed {
            user: user.clone(),
            transport,
            events: events_rx,
            renderer: self.renderer.clone(),
            notifier: self.notifier.clone(),
            evictions: self.evictions.clone(),
        });

        tracing::info!(user = %user, resumed, "session created");
        Ok(session)
    }

    /// Remove the user's entry when it still holds the given session
    /// instance. A successor session for the same user is left untouched.
    fn take_if_current(&self, user: &UserId, ident: Uuid) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get(user)?.get()?.clone();
        if session.ident() != ident {
            return None;
        }
        sessions.remove(user);
        Some(session)
    }
}

/// Consumes eviction requests from session event tasks. Holds only a weak
/// registry reference so it never outlives the registry it serves.
async fn run_janitor(
    inner: Weak<Inner>,
    mut evictions: mpsc::UnboundedReceiver<Eviction>,
) {
    while let Some(eviction) = evictions.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        if let Some(session) = inner.take_if_current(&eviction.user, eviction.ident) {
            tracing::info!(user = %eviction.user, "disconnected session evicted");
            session.teardown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use courier_protocol::LifecycleEvent;
    use courier_transport::scripted::{MemoryRecordStore, ScriptedFactory, ScriptedTransport};

    use crate::pairing::PassthroughRenderer;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    struct Harness {
        registry: SessionRegistry,
        factory: Arc<ScriptedFactory>,
        store: Arc<MemoryRecordStore>,
        notifier: SessionNotifier,
    }

    fn harness() -> Harness {
        let factory = Arc::new(ScriptedFactory::new());
        let store = Arc::new(MemoryRecordStore::new());
        let notifier = SessionNotifier::new();
        let registry = SessionRegistry::new(
            factory.clone(),
            store.clone(),
            Arc::new(PassthroughRenderer),
            notifier.clone(),
            Duration::from_secs(60),
        );
        Harness {
            registry,
            factory,
            store,
            notifier,
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    /// Drive a transport out of `Starting` so a disconnect becomes legal.
    fn to_awaiting_pairing(transport: &ScriptedTransport) {
        transport.emit(LifecycleEvent::PairingCode {
            payload: "2@x".into(),
        });
    }

    #[tokio::test]
    async fn concurrent_calls_construct_exactly_one_transport() {
        let h = Arc::new(harness());
        let u = user("u1");

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let h = h.clone();
                let u = u.clone();
                tokio::spawn(async move { h.registry.get_or_create(&u).await.unwrap() })
            })
            .collect();

        let mut idents = Vec::new();
        let mut created_count = 0;
        for task in tasks {
            let (session, created) = task.await.unwrap();
            idents.push(session.ident());
            created_count += usize::from(created);
        }

        assert_eq!(h.factory.creation_count(), 1);
        assert_eq!(created_count, 1);
        assert!(idents.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn second_call_joins_existing_session() {
        let h = harness();
        let u = user("u1");

        let (first, created_first) = h.registry.get_or_create(&u).await.unwrap();
        let (second, created_second) = h.registry.get_or_create(&u).await.unwrap();

        assert!(created_first);
        assert!(!created_second);
        assert_eq!(first.ident(), second.ident());
        assert_eq!(h.factory.creation_count(), 1);
        assert!(h.factory.latest().unwrap().initialize_called());
    }

    #[tokio::test]
    async fn store_failure_aborts_creation_and_allows_retry() {
        let h = harness();
        let u = user("u1");

        h.store.fail.store(true, Ordering::SeqCst);
        let err = h.registry.get_or_create(&u).await.unwrap_err();
        assert!(matches!(err, courier_domain::Error::Store(_)));
        assert!(h.registry.get_any(&u).is_none());
        assert!(h.registry.is_empty());

        h.store.fail.store(false, Ordering::SeqCst);
        let (_, created) = h.registry.get_or_create(&u).await.unwrap();
        assert!(created);
    }

    #[tokio::test]
    async fn resume_record_reaches_transport() {
        let h = harness();
        let u = user("u1");
        h.store.put(
            u.clone(),
            courier_domain::SessionRecord::new(serde_json::json!({ "keys": 1 })),
        );

        h.registry.get_or_create(&u).await.unwrap();
        let transport = h.factory.latest().unwrap();
        assert!(transport.resume_seen.is_some());
    }

    #[tokio::test]
    async fn disconnected_session_is_evicted_and_recreated_fresh() {
        let h = harness();
        let u = user("u1");

        let (session, _) = h.registry.get_or_create(&u).await.unwrap();
        let old_ident = session.ident();
        let transport = h.factory.latest().unwrap();

        let mut notices = h.notifier.subscribe();
        to_awaiting_pairing(&transport);
        transport.emit(LifecycleEvent::Disconnected {
            reason: "logout".into(),
        });

        // The disconnect notice is published after the phase flips, so from
        // here `get` must already refuse the dead session.
        loop {
            let notice = notices.recv().await.unwrap();
            if notice.kind() == "session.disconnected" {
                break;
            }
        }
        assert!(h.registry.get(&u).is_none());

        // The janitor eventually drops the entry and tears the transport down.
        wait_until(|| h.registry.get_any(&u).is_none()).await;
        wait_until(|| transport.shutdown_called()).await;

        let (fresh, created) = h.registry.get_or_create(&u).await.unwrap();
        assert!(created);
        assert_ne!(fresh.ident(), old_ident);
        assert_eq!(h.factory.creation_count(), 2);
    }

    #[tokio::test]
    async fn remove_tears_down_and_is_idempotent() {
        let h = harness();
        let u = user("u1");

        h.registry.get_or_create(&u).await.unwrap();
        let transport = h.factory.latest().unwrap();

        h.registry.remove(&u).await;
        assert!(transport.shutdown_called());
        assert!(h.registry.get(&u).is_none());

        // Removing again (and removing a stranger) is a no-op.
        h.registry.remove(&u).await;
        h.registry.remove(&user("stranger")).await;
    }

    #[tokio::test]
    async fn users_are_fully_independent() {
        let h = harness();
        let a = user("alice");
        let b = user("bob");

        let (session_a, _) = h.registry.get_or_create(&a).await.unwrap();
        let (session_b, _) = h.registry.get_or_create(&b).await.unwrap();
        assert_eq!(h.factory.creation_count(), 2);

        let mut notices = h.notifier.subscribe();
        h.factory
            .for_user(&a)
            .unwrap()
            .emit(LifecycleEvent::PairingCode {
                payload: "2@a".into(),
            });
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.user(), &a);

        assert_eq!(session_a.phase(), Phase::AwaitingPairing);
        assert_eq!(session_b.phase(), Phase::Starting);
    }

    #[tokio::test]
    async fn shutdown_drains_every_session() {
        let h = harness();
        h.registry.get_or_create(&user("u1")).await.unwrap();
        h.registry.get_or_create(&user("u2")).await.unwrap();

        h.registry.shutdown().await;

        assert!(h.registry.is_empty());
        let transports: Vec<_> = [user("u1"), user("u2")]
            .iter()
            .map(|u| h.factory.for_user(u).unwrap())
            .collect();
        assert!(transports.iter().all(|t| t.shutdown_called()));
        // Each shutdown flushed a final record.
        assert_eq!(h.store.save_count(), 2);
    }
}
