//! Cryptographic core for Mobile Wallet Adapter sessions.
//!
//! This crate provides:
//! - P-256 key encoding, DER/fixed-width signature conversion and HKDF
//! - The association key pair whose public half is shared out of band
//! - The HELLO_REQ / HELLO_RSP handshake drivers for both roles
//! - The AES-128-GCM session channel with strict sequence numbering
//! - The session state machine that ties them to a transport
//!
//! # Design
//!
//! The client (initiator) proves possession of the association private key
//! by signing its ephemeral public key. The wallet (responder) verifies that
//! signature against the association public key it received out of band,
//! then both sides run ECDH and derive an AES-128 key with
//! `HKDF-SHA256(ikm = shared secret, salt = association public key)`.
//!
//! Sequence numbers must arrive strictly in order: the transport is a
//! reliable stream, so any gap or repeat is treated as an attack and ends
//! the session.

#![forbid(unsafe_code)]

pub mod association;
pub mod channel;
pub mod handshake;
pub mod keys;
pub mod session;

pub use association::{AssociationKeypair, AssociationPublicKey};
pub use channel::{ChannelError, EncryptedChannel};
pub use handshake::{
    Handshake, HandshakeError, InitiatorHandshake, ProtocolVersion, ResponderHandshake,
};
pub use keys::{KeyError, SessionKey};
pub use session::{
    MobileWalletAdapterSession, SessionError, SessionListener, SessionRole, SessionState,
};
