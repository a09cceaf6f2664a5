//! The `Transport` capability set and its construction context.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use courier_domain::{Result, SessionRecord, UserId};
use courier_protocol::{Contact, LifecycleEvent};

/// Channel the transport pushes lifecycle events into. Consumed by the
/// owning session's event task; unbounded because event volume is tiny
/// (a handful per session lifetime) and the producer must never block.
pub type EventSink = mpsc::UnboundedSender<LifecycleEvent>;

/// Durable storage for session records.
///
/// `save` doubles as the transport's persistence hook target. Both methods
/// must be safe to call concurrently for different users and must not
/// corrupt a record on partial write (atomic replace semantics). Write
/// throttling is the transport's job, not the store's.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load(&self, user: &UserId) -> Result<Option<SessionRecord>>;
    async fn save(&self, user: &UserId, record: SessionRecord) -> Result<()>;
    async fn delete(&self, user: &UserId) -> Result<()>;
}

/// Everything a factory needs to wire up one user's transport.
pub struct TransportContext {
    pub user: UserId,
    /// Stored resumption record, loaded once at session creation. `None`
    /// means a fresh pairing is required.
    pub resume: Option<SessionRecord>,
    pub events: EventSink,
    /// Persistence hook target for record snapshots.
    pub records: Arc<dyn RecordStore>,
    /// Floor between snapshot saves, forwarded to the engine.
    pub min_save_interval: Duration,
}

/// One user's chat-protocol connection, driven by the session core.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin the asynchronous connection. Fire-and-forget: progress is
    /// reported through the event sink, never through this call.
    fn initialize(&self);

    /// Deliver one outbound message. No retries at this layer — re-sending
    /// may duplicate a delivered message.
    async fn send_message(&self, to: &str, body: &str) -> Result<()>;

    /// Resolve a recipient on the protocol. `None` = unknown recipient.
    async fn lookup_contact(&self, id: &str) -> Result<Option<Contact>>;

    /// Ask for an immediate record snapshot, bypassing the save-interval
    /// floor. Best-effort.
    async fn flush_record(&self);

    /// Persist the latest record and release resources. Best-effort,
    /// called once during session teardown.
    async fn shutdown(&self);
}

/// Constructs transports; injected into the session registry so the core
/// never names a concrete implementation.
pub trait TransportFactory: Send + Sync {
    fn create(&self, ctx: TransportContext) -> Result<Arc<dyn Transport>>;
}
