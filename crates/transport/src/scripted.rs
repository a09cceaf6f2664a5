//! Scripted transport for tests.
//!
//! The session core is exercised without a real protocol connection by
//! driving lifecycle events by hand: tests create a registry around a
//! [`ScriptedFactory`], grab the transport it built, and call
//! [`ScriptedTransport::emit`] to walk the session through its phases.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use courier_domain::{Error, Result, SessionRecord, UserId};
use courier_protocol::{Contact, LifecycleEvent};

use crate::client::{EventSink, RecordStore, Transport, TransportContext, TransportFactory};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory record store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Record store backed by a plain map. Mirrors the file store's
/// last-write-wins semantics.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<UserId, SessionRecord>>,
    saves: AtomicUsize,
    /// When set, every load/save fails with `Error::Store`.
    pub fail: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, user: &UserId) -> Option<SessionRecord> {
        self.records.lock().get(user).cloned()
    }

    pub fn put(&self, user: UserId, record: SessionRecord) {
        self.records.lock().insert(user, record);
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Store("scripted store failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load(&self, user: &UserId) -> Result<Option<SessionRecord>> {
        self.check()?;
        Ok(self.records.lock().get(user).cloned())
    }

    async fn save(&self, user: &UserId, record: SessionRecord) -> Result<()> {
        self.check()?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.records.lock().insert(user.clone(), record);
        Ok(())
    }

    async fn delete(&self, user: &UserId) -> Result<()> {
        self.check()?;
        self.records.lock().remove(user);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ScriptedTransport {
    user: UserId,
    events: EventSink,
    records: Arc<dyn RecordStore>,
    /// The resume record handed over at construction, for assertions.
    pub resume_seen: Option<SessionRecord>,
    /// Contacts the fake protocol knows about.
    contacts: Mutex<HashMap<String, Contact>>,
    /// Every (to, body) pair passed to `send_message`.
    sent: Mutex<Vec<(String, String)>>,
    /// When set, the next `send_message` fails with this transport error.
    send_error: Mutex<Option<String>>,
    initialized: AtomicBool,
    shutdown_called: AtomicBool,
    flushes: AtomicUsize,
}

impl ScriptedTransport {
    /// Push a lifecycle event into the owning session, as the real engine
    /// would. Ignores a closed sink (session already torn down).
    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.events.send(event);
    }

    /// Register a contact the fake protocol will resolve.
    pub fn add_contact(&self, id: &str, registered: bool) {
        self.contacts.lock().insert(
            id.to_string(),
            Contact {
                id: id.to_string(),
                registered,
            },
        );
    }

    pub fn fail_next_send(&self, message: &str) {
        *self.send_error.lock() = Some(message.to_string());
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn initialize_called(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn shutdown_called(&self) -> bool {
        self.shutdown_called.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn initialize(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<()> {
        if let Some(message) = self.send_error.lock().take() {
            return Err(Error::Transport(message));
        }
        self.sent.lock().push((to.to_string(), body.to_string()));
        Ok(())
    }

    async fn lookup_contact(&self, id: &str) -> Result<Option<Contact>> {
        Ok(self.contacts.lock().get(id).cloned())
    }

    async fn flush_record(&self) {
        // Emulate the engine's persistence hook: snapshot on demand.
        let n = self.flushes.fetch_add(1, Ordering::SeqCst) + 1;
        let record = SessionRecord::new(serde_json::json!({ "snapshot": n }));
        if let Err(e) = self.records.save(&self.user, record).await {
            tracing::warn!(user = %self.user, error = %e, "scripted flush failed");
        }
    }

    async fn shutdown(&self) {
        self.flush_record().await;
        self.shutdown_called.store(true, Ordering::SeqCst);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builds [`ScriptedTransport`]s and keeps handles to every one it built so
/// tests can drive them after the registry takes ownership.
#[derive(Default)]
pub struct ScriptedFactory {
    created: Mutex<Vec<Arc<ScriptedTransport>>>,
    creations: AtomicUsize,
    /// When set, `create` fails (exercises factory-failure paths).
    pub fail: AtomicBool,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn creation_count(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    /// The most recently created transport.
    pub fn latest(&self) -> Option<Arc<ScriptedTransport>> {
        self.created.lock().last().cloned()
    }

    /// The transport created for a given user.
    pub fn for_user(&self, user: &UserId) -> Option<Arc<ScriptedTransport>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|t| &t.user == user)
            .cloned()
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, ctx: TransportContext) -> Result<Arc<dyn Transport>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transport("scripted factory failure".into()));
        }
        self.creations.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new(ScriptedTransport {
            user: ctx.user,
            events: ctx.events,
            records: ctx.records,
            resume_seen: ctx.resume,
            contacts: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            send_error: Mutex::new(None),
            initialized: AtomicBool::new(false),
            shutdown_called: AtomicBool::new(false),
            flushes: AtomicUsize::new(0),
        });
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}
