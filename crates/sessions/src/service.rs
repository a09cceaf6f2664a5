//! Dispatch facade — the operation surface HTTP handlers call.
//!
//! Thin by design: recipient normalization and the contact check live here,
//! everything stateful is delegated to the registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use courier_domain::{Error, Result, UserId};

use crate::notify::SessionNotice;
use crate::phase::Phase;
use crate::registry::{SessionRegistry, SessionSummary};

/// Protocol address suffix appended to bare phone numbers.
pub const ADDRESS_SUFFIX: &str = "@c.us";

/// Outcome of an initialization request. Asking for a session that already
/// exists is not an error.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InitOutcome {
    Created { phase: Phase },
    AlreadyRunning { phase: Phase },
}

impl InitOutcome {
    pub fn phase(&self) -> Phase {
        match self {
            InitOutcome::Created { phase } | InitOutcome::AlreadyRunning { phase } => *phase,
        }
    }
}

pub struct SessionService {
    registry: Arc<SessionRegistry>,
}

impl SessionService {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Idempotent create-or-noop. Returns immediately with the session's
    /// current phase; pairing and readiness arrive later through the
    /// notification channel.
    pub async fn initialize(&self, user: &UserId) -> Result<InitOutcome> {
        let (session, created) = self.registry.get_or_create(user).await?;
        let phase = session.phase();
        Ok(if created {
            InitOutcome::Created { phase }
        } else {
            InitOutcome::AlreadyRunning { phase }
        })
    }

    /// Send one outbound message. Returns the normalized protocol address
    /// the message went to.
    ///
    /// The recipient is reduced to its digits and given the protocol
    /// suffix, then resolved via contact lookup: an address the protocol
    /// does not know fails with `RecipientNotFound` before anything is sent.
    pub async fn send(&self, user: &UserId, to: &str, body: &str) -> Result<String> {
        let session = self
            .registry
            .get_any(user)
            .ok_or_else(|| Error::UnknownSession(user.to_string()))?;

        let to = normalize_recipient(to)?;
        let contact = session.lookup_contact(&to).await?;
        let contact = match contact {
            Some(c) if c.registered => c,
            _ => return Err(Error::RecipientNotFound(to)),
        };

        session.send(&contact.id, body).await?;
        tracing::info!(user = %user, to = %contact.id, "message sent");
        Ok(contact.id)
    }

    /// Current phase and creation time, or `None` when no session exists.
    /// A disconnected session still reports its phase until eviction lands.
    pub fn status(&self, user: &UserId) -> Option<(Phase, DateTime<Utc>)> {
        let session = self.registry.get_any(user)?;
        Some((session.phase(), session.created_at()))
    }

    /// Explicit teardown. Safe to call when no session exists.
    pub async fn disconnect(&self, user: &UserId) {
        self.registry.remove(user).await;
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.registry.list()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.registry.notifier().subscribe()
    }
}

/// Reduce a recipient to digits and append the protocol suffix, mirroring
/// what the protocol expects for phone-number addressing. `"+49 157 33"`
/// and `"4915733@c.us"` both normalize to `"4915733@c.us"`.
fn normalize_recipient(to: &str) -> Result<String> {
    let digits: String = to.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(Error::RecipientNotFound(to.to_string()));
    }
    Ok(format!("{digits}{ADDRESS_SUFFIX}"))
}
