//! Transport client contract.
//!
//! A transport is the per-user chat-protocol connection object. Courier
//! wraps it, it does not reimplement it: the session core drives transports
//! exclusively through the [`Transport`] trait so it can run against the
//! gateway's engine bridge in production and against [`scripted`] doubles in
//! tests.

pub mod client;
pub mod scripted;

pub use client::{EventSink, RecordStore, Transport, TransportContext, TransportFactory};
