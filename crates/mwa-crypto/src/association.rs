//! Association keys.
//!
//! The client generates one association key pair per connection attempt.
//! Its public half reaches the wallet out of band (deep link, QR code) as
//! the *association token*: the base64url-encoded (no padding) 65-byte
//! uncompressed point. During the handshake the client signs its ephemeral
//! public key with the private half, which is how the wallet knows the
//! encrypted session is with the same party that sent the association.
//!
//! # Example
//!
//! ```
//! use mwa_crypto::association::{AssociationKeypair, AssociationPublicKey};
//!
//! let keypair = AssociationKeypair::generate();
//! let token = keypair.association_token();
//!
//! let public = AssociationPublicKey::from_association_token(&token).unwrap();
//! let signature = keypair.sign(b"ephemeral key");
//! assert!(public.verify(b"ephemeral key", &signature));
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::PublicKey;
use rand::rngs::OsRng;
use std::fmt;
use tracing::debug;

use crate::keys::{
    decode_public_key, encode_public_key, fixed_to_der, KeyError,
    ENCODED_PUBLIC_KEY_LEN, SIGNATURE_LEN,
};

/// Long-lived (per connection attempt) association key pair.
///
/// The signing key is zeroized on drop by `p256`.
pub struct AssociationKeypair {
    signing_key: SigningKey,
    public_encoded: [u8; ENCODED_PUBLIC_KEY_LEN],
}

impl AssociationKeypair {
    /// Generate a new random key pair using the OS CSPRNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Restore from a 32-byte private scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_encoded = encode_public_key(&PublicKey::from(signing_key.verifying_key()));
        Self {
            signing_key,
            public_encoded,
        }
    }

    /// The public half.
    pub fn public_key(&self) -> AssociationPublicKey {
        AssociationPublicKey {
            verifying_key: self.signing_key.verifying_key().clone(),
            encoded: self.public_encoded,
        }
    }

    /// The encoded public half (65-byte uncompressed point).
    pub fn public_key_encoded(&self) -> &[u8; ENCODED_PUBLIC_KEY_LEN] {
        &self.public_encoded
    }

    /// Base64url (no padding) of the encoded public key, as carried in the
    /// association payload.
    pub fn association_token(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public_encoded)
    }

    /// Sign `message` with ECDSA-P256-SHA256 and return the fixed-width
    /// `r || s` wire form.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        let signature: Signature = self.signing_key.sign(message);
        let mut fixed = [0u8; SIGNATURE_LEN];
        fixed.copy_from_slice(&signature.to_bytes());
        fixed
    }
}

impl fmt::Debug for AssociationKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationKeypair")
            .field("token", &self.association_token())
            .finish_non_exhaustive()
    }
}

/// Association public key, as known to the wallet.
#[derive(Clone, PartialEq, Eq)]
pub struct AssociationPublicKey {
    verifying_key: VerifyingKey,
    encoded: [u8; ENCODED_PUBLIC_KEY_LEN],
}

impl AssociationPublicKey {
    /// Parse a 65-byte uncompressed point.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, KeyError> {
        let public_key = decode_public_key(bytes)?;
        Ok(Self {
            verifying_key: VerifyingKey::from(&public_key),
            encoded: encode_public_key(&public_key),
        })
    }

    /// Parse an association token (base64url of the encoded point).
    pub fn from_association_token(token: &str) -> Result<Self, KeyError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim_end_matches('='))
            .map_err(|_| KeyError::InvalidAssociationToken)?;
        Self::from_encoded(&bytes).map_err(|_| KeyError::InvalidAssociationToken)
    }

    /// The encoded point.
    pub fn encoded(&self) -> &[u8; ENCODED_PUBLIC_KEY_LEN] {
        &self.encoded
    }

    /// Base64url (no padding) of the encoded point.
    pub fn association_token(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.encoded)
    }

    /// Verify a fixed-width signature over `message`.
    ///
    /// The fixed-width form is re-encoded to DER before verification.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let der_bytes = match fixed_to_der(signature) {
            Ok(d) => d,
            Err(e) => {
                debug!("rejecting malformed association signature: {e}");
                return false;
            }
        };
        let Ok(signature) = Signature::from_der(&der_bytes) else {
            return false;
        };
        self.verifying_key.verify(message, &signature).is_ok()
    }
}

impl fmt::Debug for AssociationPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssociationPublicKey({})", self.association_token())
    }
}
