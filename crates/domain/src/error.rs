/// Shared error type used across all Courier crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Send attempted while the session is not in the `Ready` phase.
    /// Callers must retry once the session reports ready.
    #[error("session not ready (phase: {phase})")]
    NotReady { phase: String },

    /// Pairing was rejected by the protocol. The session is unusable until
    /// it is removed and a new one is initialized.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The underlying transport reported a failure. Surfaced verbatim, never
    /// retried here: re-sending may duplicate a delivered message.
    #[error("transport: {0}")]
    Transport(String),

    /// The recipient is not reachable on the protocol.
    #[error("recipient not found: {0}")]
    RecipientNotFound(String),

    /// The record store could not read or write a session record. Fatal to
    /// the session creation attempt it happened in.
    #[error("record store: {0}")]
    Store(String),

    /// No live session exists for the given user.
    #[error("no session for user: {0}")]
    UnknownSession(String),

    #[error("invalid user id: {0}")]
    InvalidUserId(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
