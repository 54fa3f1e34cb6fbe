//! Outbound message seam.
//!
//! The physical transport (local WebSocket, reflector, in-memory channel) is
//! outside this workspace. Every layer that needs to emit bytes does it
//! through [`MessageSender`], which lets the session forward ciphertext to
//! the transport and lets the JSON-RPC layer forward plaintext to the
//! session with the same interface.

use thiserror::Error;

/// Errors raised when handing a message to the layer below.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The underlying transport is closed or was never connected.
    #[error("transport closed")]
    Closed,

    /// The layer below refused the message.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Sink for opaque outbound messages.
///
/// Implementations must not block on the peer; they hand the message to a
/// queue or socket and return.
pub trait MessageSender: Send + Sync {
    /// Send one framed message.
    fn send(&self, message: &[u8]) -> Result<(), TransportError>;
}
