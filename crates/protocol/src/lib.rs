//! Engine protocol: WebSocket message types exchanged between the gateway
//! and protocol engines.
//!
//! An engine is an external process that speaks the actual chat protocol for
//! exactly one user session. It attaches to the gateway over WebSocket,
//! pushes lifecycle events and record snapshots upstream, and executes send
//! and contact-lookup requests on behalf of the session.

use serde::{Deserialize, Serialize};

use courier_domain::{SessionRecord, UserId};

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineMessage {
    /// Engine → Gateway: initial handshake.
    #[serde(rename = "engine_hello")]
    EngineHello {
        user: UserId,
        engine_version: String,
    },

    /// Gateway → Engine: handshake accepted. Carries the stored resumption
    /// record (if any) and the save-interval floor the engine must honor.
    #[serde(rename = "engine_welcome")]
    EngineWelcome {
        gateway_version: String,
        resume: Option<SessionRecord>,
        min_save_interval_secs: u64,
    },

    /// Engine → Gateway: a session lifecycle event.
    #[serde(rename = "event")]
    Event { event: LifecycleEvent },

    /// Gateway → Engine: deliver an outbound message.
    #[serde(rename = "send_request")]
    SendRequest {
        request_id: String,
        to: String,
        body: String,
    },

    /// Engine → Gateway: outcome of a send request.
    #[serde(rename = "send_response")]
    SendResponse {
        request_id: String,
        delivered: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Gateway → Engine: resolve a recipient on the protocol.
    #[serde(rename = "contact_request")]
    ContactRequest {
        request_id: String,
        contact_id: String,
    },

    /// Engine → Gateway: contact lookup result. `contact: None` with no
    /// error means the recipient is unknown to the protocol.
    #[serde(rename = "contact_response")]
    ContactResponse {
        request_id: String,
        contact: Option<Contact>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Engine → Gateway: persistence hook — store this resumption snapshot.
    #[serde(rename = "record_save")]
    RecordSave { record: SessionRecord },

    /// Gateway → Engine: request an immediate snapshot, bypassing the
    /// save-interval floor (used right after authentication).
    #[serde(rename = "record_request")]
    RecordRequest {},

    /// Gateway → Engine: persist and release, the gateway is going away.
    #[serde(rename = "shutdown")]
    Shutdown {},

    /// Bidirectional: heartbeat.
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },

    /// Bidirectional: heartbeat response.
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}

/// A session lifecycle event emitted by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A one-time pairing credential the user must acknowledge out-of-band.
    PairingCode { payload: String },
    /// The protocol accepted the paired credential.
    Authenticated,
    /// The connection is fully operational; sends may flow.
    Ready,
    /// Pairing was rejected.
    AuthFailure { reason: String },
    /// The transport lost its connection for good.
    Disconnected { reason: String },
}

/// A contact known to the protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Protocol address, e.g. `"4915733634313@c.us"`.
    pub id: String,
    /// Whether the address belongs to a registered protocol account.
    pub registered: bool,
}
