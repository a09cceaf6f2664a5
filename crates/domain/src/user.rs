use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// Opaque key identifying a registered account.
///
/// Supplied by the credential service that fronts the API; Courier never
/// inspects it beyond validation. The charset is restricted so the id can
/// double as a file name in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub const MAX_LEN: usize = 128;

    /// Validate and wrap a raw user id.
    ///
    /// Accepts ASCII alphanumerics plus `_`, `-` and `.`; rejects empty,
    /// over-long, and dot-only ids (`.`/`..` would escape the record dir).
    pub fn new(raw: impl Into<String>) -> Result<Self, Error> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(Error::InvalidUserId("empty".into()));
        }
        if raw.len() > Self::MAX_LEN {
            return Err(Error::InvalidUserId(format!(
                "longer than {} bytes",
                Self::MAX_LEN
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
        {
            return Err(Error::InvalidUserId(raw));
        }
        if raw.bytes().all(|b| b == b'.') {
            return Err(Error::InvalidUserId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self, Error> {
        Self::new(raw)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> String {
        id.0
    }
}
