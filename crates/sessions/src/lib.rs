//! Multi-tenant session lifecycle management.
//!
//! The core of Courier: a process-wide [`SessionRegistry`] maps each user to
//! at most one live [`Session`], each session owns exactly one transport and
//! serializes its lifecycle transitions through a dedicated event task, and
//! a [`FileRecordStore`] keeps the resumption snapshot that lets a transport
//! reconnect without re-pairing. The [`SessionService`] facade is the only
//! surface the HTTP layer talks to.

pub mod notify;
pub mod pairing;
pub mod phase;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;

pub use notify::{SessionNotice, SessionNotifier};
pub use pairing::{PairingRenderer, PassthroughRenderer};
pub use phase::Phase;
pub use registry::{SessionRegistry, SessionSummary};
pub use service::{InitOutcome, SessionService};
pub use session::Session;
pub use store::FileRecordStore;
