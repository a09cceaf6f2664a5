//! AppState construction extracted from `main.rs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use courier_domain::config::{Config, ConfigSeverity};
use courier_sessions::{
    FileRecordStore, PassthroughRenderer, SessionNotifier, SessionRegistry, SessionService,
};
use courier_transport::RecordStore;

use crate::engine::bridge::BridgeFactory;
use crate::engine::hub::EngineHub;
use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Record store ─────────────────────────────────────────────────
    let records: Arc<dyn RecordStore> = Arc::new(
        FileRecordStore::new(&config.storage.state_path)
            .context("initializing record store")?,
    );

    // ── Engine hub + bridge transports ───────────────────────────────
    let engines = Arc::new(EngineHub::new(Duration::from_secs(
        config.transport.request_timeout_secs,
    )));
    let factory = Arc::new(BridgeFactory::new(engines.clone()));
    tracing::info!("engine hub ready");

    // ── Session core ─────────────────────────────────────────────────
    let notifier = SessionNotifier::new();
    let registry = Arc::new(SessionRegistry::new(
        factory,
        records.clone(),
        Arc::new(PassthroughRenderer),
        notifier,
        Duration::from_secs(config.transport.min_save_interval_secs),
    ));
    let sessions = Arc::new(SessionService::new(registry));
    tracing::info!(
        min_save_interval_secs = config.transport.min_save_interval_secs,
        "session registry ready"
    );

    // ── API token (read once, hash for constant-time comparison) ─────
    let api_token_hash = read_token_hash(&config.server.api_token_env, "API");

    // ── Engine token ─────────────────────────────────────────────────
    let engine_token_hash = read_token_hash(&config.transport.engine_token_env, "engine");

    Ok(AppState {
        config,
        sessions,
        records,
        engines,
        api_token_hash,
        engine_token_hash,
    })
}

/// Read a bearer token from the named env var and return its SHA-256
/// digest, or `None` (dev mode) when unset or empty.
fn read_token_hash(env_var: &str, label: &str) -> Option<Vec<u8>> {
    match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
        Some(token) => {
            tracing::info!(source = %format!("env:{env_var}"), "{label} token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        None => {
            tracing::warn!("{label} token auth DISABLED — set the {env_var} env var");
            None
        }
    }
}
