use std::sync::Arc;

use courier_domain::config::Config;
use courier_sessions::SessionService;
use courier_transport::RecordStore;

use crate::engine::hub::EngineHub;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    /// Dispatch facade over the session registry.
    pub sessions: Arc<SessionService>,

    /// Session record store; the engine WS handler persists `record_save`
    /// frames through it and serves resume payloads from it.
    pub records: Arc<dyn RecordStore>,

    /// Attached protocol engines and request correlation.
    pub engines: Arc<EngineHub>,

    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,

    /// SHA-256 hash of the engine pre-shared token (read once at startup).
    /// `None` = dev mode (engines attach without a token).
    pub engine_token_hash: Option<Vec<u8>>,
}
