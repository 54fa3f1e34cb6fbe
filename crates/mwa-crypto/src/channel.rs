//! Encrypted session channel.
//!
//! Once the handshake has produced a session key, every message in either
//! direction is an AES-128-GCM frame:
//!
//! ```text
//! [4 bytes: sequence number, big-endian] [12 bytes: random nonce] [ciphertext || 16-byte tag]
//! ```
//!
//! The sequence number doubles as the AEAD associated data, so it cannot be
//! rewritten without failing authentication.
//!
//! # Ordering
//!
//! Unlike a datagram transport, the association transport is a reliable
//! ordered stream. A receiver therefore accepts exactly `rx + 1` and
//! nothing else: a replayed, dropped or reordered frame is fatal to the
//! session. Both counters start at 0 when the channel is created, so the
//! first frame in each direction carries sequence number 1.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::keys::SessionKey;

/// Size of the big-endian sequence number prefix.
pub const SEQUENCE_NUMBER_LEN: usize = 4;

/// Size of the random AES-GCM nonce.
pub const NONCE_LEN: usize = 12;

/// Size of the AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Bytes added to every plaintext.
pub const FRAME_OVERHEAD: usize = SEQUENCE_NUMBER_LEN + NONCE_LEN + TAG_LEN;

/// Channel errors. All of them are fatal to the session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("unexpected sequence number: expected {expected}, received {received}")]
    SequenceMismatch { expected: u32, received: u32 },

    #[error("sequence number space exhausted")]
    SequenceExhausted,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,
}

/// AES-128-GCM channel with send/receive sequence counters.
pub struct EncryptedChannel {
    cipher: Aes128Gcm,
    /// Sequence number of the last frame sent
    tx_seq: u32,
    /// Sequence number of the last frame accepted
    rx_seq: u32,
}

impl EncryptedChannel {
    /// Create a channel with both counters at 0.
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: Aes128Gcm::new(key.as_bytes().into()),
            tx_seq: 0,
            rx_seq: 0,
        }
    }

    /// Encrypt `plaintext` into a frame carrying the next tx sequence
    /// number.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let seq = self
            .tx_seq
            .checked_add(1)
            .ok_or(ChannelError::SequenceExhausted)?;
        let aad = seq.to_be_bytes();

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| ChannelError::EncryptionFailed)?;

        self.tx_seq = seq;

        let mut frame = Vec::with_capacity(SEQUENCE_NUMBER_LEN + NONCE_LEN + ciphertext.len());
        frame.extend_from_slice(&aad);
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&ciphertext);
        Ok(frame)
    }

    /// Decrypt a frame.
    ///
    /// # Errors
    /// Fails without touching the rx counter if the frame is truncated, its
    /// sequence number is not exactly `rx + 1`, or authentication fails.
    pub fn decrypt(&mut self, frame: &[u8]) -> Result<Vec<u8>, ChannelError> {
        if frame.len() < FRAME_OVERHEAD {
            return Err(ChannelError::FrameTooShort(frame.len()));
        }

        let (aad, rest) = frame.split_at(SEQUENCE_NUMBER_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let mut seq_bytes = [0u8; SEQUENCE_NUMBER_LEN];
        seq_bytes.copy_from_slice(aad);
        let received = u32::from_be_bytes(seq_bytes);

        let expected = self
            .rx_seq
            .checked_add(1)
            .ok_or(ChannelError::SequenceExhausted)?;
        if received != expected {
            return Err(ChannelError::SequenceMismatch { expected, received });
        }

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| ChannelError::DecryptionFailed)?;

        self.rx_seq = received;
        Ok(plaintext)
    }

    /// Sequence number of the last frame sent (0 before the first).
    pub fn tx_sequence(&self) -> u32 {
        self.tx_seq
    }

    /// Sequence number of the last frame accepted (0 before the first).
    pub fn rx_sequence(&self) -> u32 {
        self.rx_seq
    }
}

impl std::fmt::Debug for EncryptedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedChannel")
            .field("tx_seq", &self.tx_seq)
            .field("rx_seq", &self.rx_seq)
            .finish_non_exhaustive()
    }
}
