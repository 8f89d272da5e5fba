//! Error types for the session core.

use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the session core.
#[derive(Debug, Error)]
pub enum Error {
    /// Inbound frame failed to decode. Contained at the reader boundary:
    /// the frame is dropped and the reader keeps going.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A waiter is already registered under this id. Programming error,
    /// fatal to the offending call only.
    #[error("Duplicate request id: {0}")]
    DuplicateId(String),

    /// No matching reply arrived within the deadline. The registry entry
    /// was cancelled before this was returned.
    #[error("Timed out waiting for reply")]
    Timeout,

    /// The device answered the pairing handshake with something the
    /// controller does not recognize.
    #[error("Pairing handshake failed: {0}")]
    HandshakeFailed(String),

    /// The session closed while the request was outstanding, or the send
    /// was attempted after close.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Write or connect failure from the underlying transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Returns true if the session is gone rather than the request failing.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }
}
