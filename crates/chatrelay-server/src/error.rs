//! Server error types.

use thiserror::Error;

/// Relay server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A message payload does not have the shape its handler expects.
    #[error("invalid payload for `{name}`: {source}")]
    Decode {
        name: String,
        source: serde_json::Error,
    },

    /// An inbound frame is not a `{name, data}` envelope.
    #[error("invalid message envelope: {0}")]
    Envelope(serde_json::Error),

    /// An outbound message could not be serialized.
    #[error("encoding error: {0}")]
    Encode(serde_json::Error),

    /// Store error.
    #[error(transparent)]
    Store(#[from] chatrelay_store::Error),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
