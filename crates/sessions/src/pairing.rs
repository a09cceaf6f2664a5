//! Pairing-code rendering seam.

use courier_domain::Result;

/// Turns a raw pairing payload into something displayable. Stateless.
///
/// Courier does not render codes itself; deployments plug in whatever
/// renderer their front-end expects (typically a QR encoder producing a data
/// URL).
pub trait PairingRenderer: Send + Sync {
    fn render(&self, payload: &str) -> Result<String>;
}

/// Default renderer: hands the raw payload through unchanged, leaving the
/// encoding to the consumer of the notification channel.
pub struct PassthroughRenderer;

impl PairingRenderer for PassthroughRenderer {
    fn render(&self, payload: &str) -> Result<String> {
        Ok(payload.to_string())
    }
}
