//! Protocol-engine bridge: WebSocket attach point, connection hub, and the
//! `Transport` implementation the session core drives.

pub mod bridge;
pub mod hub;
pub mod ws;
