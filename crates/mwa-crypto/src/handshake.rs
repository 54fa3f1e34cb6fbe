//! HELLO handshake drivers.
//!
//! ```text
//! HELLO_REQ (initiator -> responder):
//!   [65 bytes: Qc, ephemeral public key] [64 bytes: ECDSA(Qc) under the association key]
//!
//! HELLO_RSP (responder -> initiator):
//!   [65 bytes: Qw, ephemeral public key] [optional: encrypted session properties frame]
//! ```
//!
//! Both sides then compute `ECDH(own ephemeral, peer ephemeral)` and derive
//! the session key with the association public key as HKDF salt. The
//! channel is created only after the key exists, so its counters start at 0
//! exactly at the transition into the encrypted state.
//!
//! The session properties frame, when present, is the responder's first
//! channel frame (sequence 1) and carries the negotiated protocol version.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::association::{AssociationKeypair, AssociationPublicKey};
use crate::channel::{ChannelError, EncryptedChannel};
use crate::keys::{
    decode_public_key, derive_session_key, EphemeralKeyPair, KeyError, ENCODED_PUBLIC_KEY_LEN,
    SIGNATURE_LEN,
};

/// Length of a HELLO_REQ without trailing bytes.
pub const HELLO_REQ_LEN: usize = ENCODED_PUBLIC_KEY_LEN + SIGNATURE_LEN;

/// Length of a HELLO_RSP without session properties.
pub const HELLO_RSP_LEN: usize = ENCODED_PUBLIC_KEY_LEN;

/// Handshake errors.
///
/// Everything except [`HandshakeError::InvalidState`] is fatal to the
/// session. `InvalidState` means the driver was called out of order.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("cannot {operation}: {reason}")]
    InvalidState {
        operation: &'static str,
        reason: &'static str,
    },

    #[error("malformed HELLO_REQ: {0}")]
    MalformedHelloRequest(String),

    #[error("malformed HELLO_RSP: {0}")]
    MalformedHelloResponse(String),

    #[error("HELLO_REQ signature does not match the association key")]
    SignatureInvalid,

    #[error("invalid session properties: {0}")]
    SessionProperties(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl HandshakeError {
    /// Whether this is a caller bug rather than a remote failure.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, HandshakeError::InvalidState { .. })
    }
}

/// Negotiated session protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProtocolVersion {
    /// No session properties were exchanged.
    #[default]
    #[serde(rename = "legacy")]
    Legacy,
    #[serde(rename = "v1")]
    V1,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::Legacy => "legacy",
            ProtocolVersion::V1 => "v1",
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(ProtocolVersion::Legacy),
            "v1" => Ok(ProtocolVersion::V1),
            other => Err(format!("unknown protocol version: {other}")),
        }
    }
}

/// Session properties carried in HELLO_RSP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SessionProperties {
    v: ProtocolVersion,
}

/// Initiator handshake state.
enum InitiatorState {
    /// HELLO_REQ not yet produced
    Idle,
    /// HELLO_REQ sent, holding the ephemeral key until HELLO_RSP arrives
    AwaitingHelloResponse(EphemeralKeyPair),
    /// Finished, successfully or not
    Done,
}

/// Client-side handshake driver.
pub struct InitiatorHandshake {
    association: AssociationKeypair,
    state: InitiatorState,
}

impl InitiatorHandshake {
    pub fn new(association: AssociationKeypair) -> Self {
        Self {
            association,
            state: InitiatorState::Idle,
        }
    }

    /// Generate the ephemeral key pair and build HELLO_REQ.
    pub fn hello_request(&mut self) -> Result<Vec<u8>, HandshakeError> {
        if !matches!(self.state, InitiatorState::Idle) {
            return Err(HandshakeError::InvalidState {
                operation: "build HELLO_REQ",
                reason: "already sent",
            });
        }

        let ephemeral = EphemeralKeyPair::generate();
        let signature = self.association.sign(ephemeral.public_key_encoded());

        let mut message = Vec::with_capacity(HELLO_REQ_LEN);
        message.extend_from_slice(ephemeral.public_key_encoded());
        message.extend_from_slice(&signature);

        self.state = InitiatorState::AwaitingHelloResponse(ephemeral);
        debug!("built HELLO_REQ");
        Ok(message)
    }

    /// Consume HELLO_RSP and produce the session channel.
    ///
    /// The ephemeral key pair is dropped whether or not this succeeds.
    pub fn handle_hello_response(
        &mut self,
        message: &[u8],
    ) -> Result<(EncryptedChannel, ProtocolVersion), HandshakeError> {
        let ephemeral = match std::mem::replace(&mut self.state, InitiatorState::Done) {
            InitiatorState::AwaitingHelloResponse(ephemeral) => ephemeral,
            other => {
                self.state = other;
                return Err(HandshakeError::InvalidState {
                    operation: "handle HELLO_RSP",
                    reason: "no HELLO_REQ outstanding",
                });
            }
        };

        if message.len() < HELLO_RSP_LEN {
            return Err(HandshakeError::MalformedHelloResponse(format!(
                "expected at least {HELLO_RSP_LEN} bytes, got {}",
                message.len()
            )));
        }
        let (public_key, properties) = message.split_at(HELLO_RSP_LEN);
        let wallet_public = decode_public_key(public_key)
            .map_err(|e| HandshakeError::MalformedHelloResponse(e.to_string()))?;

        let shared = ephemeral.agree(&wallet_public);
        let key = derive_session_key(&shared, self.association.public_key_encoded())?;
        let mut channel = EncryptedChannel::new(&key);

        let protocol_version = if properties.is_empty() {
            ProtocolVersion::Legacy
        } else {
            let plaintext = channel.decrypt(properties)?;
            let parsed: SessionProperties = serde_json::from_slice(&plaintext)
                .map_err(|e| HandshakeError::SessionProperties(e.to_string()))?;
            parsed.v
        };

        debug!(%protocol_version, "HELLO_RSP accepted");
        Ok((channel, protocol_version))
    }
}

impl std::fmt::Debug for InitiatorHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            InitiatorState::Idle => "idle",
            InitiatorState::AwaitingHelloResponse(_) => "awaiting_hello_rsp",
            InitiatorState::Done => "done",
        };
        f.debug_struct("InitiatorHandshake")
            .field("association", &self.association)
            .field("state", &state)
            .finish()
    }
}

/// Wallet-side handshake driver.
#[derive(Debug)]
pub struct ResponderHandshake {
    association: AssociationPublicKey,
    protocol_version: Option<ProtocolVersion>,
    done: bool,
}

impl ResponderHandshake {
    /// `protocol_version` is advertised in HELLO_RSP when set; when `None`
    /// the reply is a bare public key and the session is legacy.
    pub fn new(association: AssociationPublicKey, protocol_version: Option<ProtocolVersion>) -> Self {
        Self {
            association,
            protocol_version,
            done: false,
        }
    }

    pub fn association_public_key(&self) -> &AssociationPublicKey {
        &self.association
    }

    /// Verify HELLO_REQ and build HELLO_RSP.
    ///
    /// Bytes after the first [`HELLO_REQ_LEN`] are ignored.
    pub fn handle_hello_request(
        &mut self,
        message: &[u8],
    ) -> Result<(Vec<u8>, EncryptedChannel, ProtocolVersion), HandshakeError> {
        if self.done {
            return Err(HandshakeError::InvalidState {
                operation: "handle HELLO_REQ",
                reason: "handshake already processed",
            });
        }
        self.done = true;

        if message.len() < HELLO_REQ_LEN {
            return Err(HandshakeError::MalformedHelloRequest(format!(
                "expected at least {HELLO_REQ_LEN} bytes, got {}",
                message.len()
            )));
        }
        let public_key = &message[..ENCODED_PUBLIC_KEY_LEN];
        let signature = &message[ENCODED_PUBLIC_KEY_LEN..HELLO_REQ_LEN];

        let client_public = decode_public_key(public_key)
            .map_err(|e| HandshakeError::MalformedHelloRequest(e.to_string()))?;
        if !self.association.verify(public_key, signature) {
            return Err(HandshakeError::SignatureInvalid);
        }

        let ephemeral = EphemeralKeyPair::generate();
        let shared = ephemeral.agree(&client_public);
        let key = derive_session_key(&shared, self.association.encoded())?;
        let mut channel = EncryptedChannel::new(&key);

        let mut reply = ephemeral.public_key_encoded().to_vec();
        let protocol_version = match self.protocol_version {
            Some(v) => {
                let properties = serde_json::to_vec(&SessionProperties { v })
                    .map_err(|e| HandshakeError::SessionProperties(e.to_string()))?;
                reply.extend_from_slice(&channel.encrypt(&properties)?);
                v
            }
            None => ProtocolVersion::Legacy,
        };

        debug!(%protocol_version, "HELLO_REQ verified");
        Ok((reply, channel, protocol_version))
    }
}

/// Role-specific handshake driver.
#[derive(Debug)]
pub enum Handshake {
    Initiator(InitiatorHandshake),
    Responder(ResponderHandshake),
}
