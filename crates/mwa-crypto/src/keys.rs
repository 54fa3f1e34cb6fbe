//! P-256 key handling and key derivation.
//!
//! Public keys travel as 65-byte uncompressed SEC1 points. Signatures travel
//! in the fixed-width 64-byte `r || s` form; platform signers and verifiers
//! on the other side of the boundary usually speak ASN.1 DER, so both
//! conversions are provided.

use ecdsa::der;
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::Signature;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use mwa_common::helpers::constant_time_eq;

/// Length of an uncompressed SEC1 P-256 point.
pub const ENCODED_PUBLIC_KEY_LEN: usize = 65;

/// Length of a fixed-width (`r || s`) ECDSA P-256 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Length of the derived AES-128 session key.
pub const SESSION_KEY_LEN: usize = 16;

/// SEC1 tag for an uncompressed point.
const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

/// Key encoding and derivation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid public key encoding")]
    InvalidPublicKey,

    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("invalid association token")]
    InvalidAssociationToken,
}

/// Encode a public key as a 65-byte uncompressed point.
pub fn encode_public_key(key: &PublicKey) -> [u8; ENCODED_PUBLIC_KEY_LEN] {
    let point = key.to_encoded_point(false);
    let mut out = [0u8; ENCODED_PUBLIC_KEY_LEN];
    out.copy_from_slice(point.as_bytes());
    out
}

/// Decode a 65-byte uncompressed point.
///
/// Compressed points and the identity encoding are rejected: the wire format
/// only ever carries the uncompressed form.
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey, KeyError> {
    if bytes.len() != ENCODED_PUBLIC_KEY_LEN || bytes[0] != UNCOMPRESSED_POINT_TAG {
        return Err(KeyError::InvalidPublicKey);
    }
    PublicKey::from_sec1_bytes(bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// Convert an ASN.1 DER ECDSA signature to the fixed-width form.
pub fn der_to_fixed(der_bytes: &[u8]) -> Result<[u8; SIGNATURE_LEN], KeyError> {
    let signature =
        Signature::from_der(der_bytes).map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
    let mut out = [0u8; SIGNATURE_LEN];
    out.copy_from_slice(&signature.to_bytes());
    Ok(out)
}

/// Convert a fixed-width ECDSA signature to ASN.1 DER.
pub fn fixed_to_der(fixed: &[u8]) -> Result<Vec<u8>, KeyError> {
    if fixed.len() != SIGNATURE_LEN {
        return Err(KeyError::InvalidSignature(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            fixed.len()
        )));
    }
    let signature =
        Signature::from_slice(fixed).map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
    let encoded: der::Signature<p256::NistP256> = signature.to_der();
    Ok(encoded.as_bytes().to_vec())
}

/// AES-128 session key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for SessionKey {}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Derive the session key: `HKDF-SHA256(ikm = ecdh_secret, salt =
/// encoded association public key, info = "")`, truncated to 16 bytes.
pub fn derive_session_key(
    ecdh_secret: &[u8],
    association_public_key: &[u8],
) -> Result<SessionKey, KeyError> {
    let hk = Hkdf::<Sha256>::new(Some(association_public_key), ecdh_secret);
    let mut okm = [0u8; SESSION_KEY_LEN];
    hk.expand(&[], &mut okm)
        .map_err(|_| KeyError::KeyDerivation)?;
    let key = SessionKey::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}

/// Ephemeral ECDH key pair, generated fresh for each handshake attempt.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public_encoded: [u8; ENCODED_PUBLIC_KEY_LEN],
}

impl EphemeralKeyPair {
    /// Generate a new key pair using the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_encoded = encode_public_key(&secret.public_key());
        Self {
            secret,
            public_encoded,
        }
    }

    /// The encoded public half.
    pub fn public_key_encoded(&self) -> &[u8; ENCODED_PUBLIC_KEY_LEN] {
        &self.public_encoded
    }

    /// Run ECDH against the peer's public key and return the raw shared
    /// secret (the x coordinate).
    pub fn agree(&self, peer: &PublicKey) -> Zeroizing<Vec<u8>> {
        let shared = self.secret.diffie_hellman(peer);
        Zeroizing::new(shared.raw_secret_bytes().to_vec())
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &hex_prefix(&self.public_encoded))
            .finish_non_exhaustive()
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(8)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;

    #[test]
    fn test_public_key_encoding_roundtrip() {
        let pair = EphemeralKeyPair::generate();
        let encoded = pair.public_key_encoded();
        assert_eq!(encoded.len(), ENCODED_PUBLIC_KEY_LEN);
        assert_eq!(encoded[0], 0x04);

        let decoded = decode_public_key(encoded).unwrap();
        assert_eq!(&encode_public_key(&decoded), encoded);
    }

    #[test]
    fn test_decode_rejects_bad_points() {
        let pair = EphemeralKeyPair::generate();
        let encoded = pair.public_key_encoded();

        assert_eq!(decode_public_key(&encoded[..64]), Err(KeyError::InvalidPublicKey));

        let mut compressed_tag = *encoded;
        compressed_tag[0] = 0x02;
        assert_eq!(decode_public_key(&compressed_tag), Err(KeyError::InvalidPublicKey));

        let mut off_curve = *encoded;
        off_curve[64] ^= 0x01;
        assert_eq!(decode_public_key(&off_curve), Err(KeyError::InvalidPublicKey));
    }

    #[test]
    fn test_signature_conversions() {
        let key = SigningKey::random(&mut OsRng);
        let signature: Signature = key.sign(b"hello");
        let der_bytes = signature.to_der().as_bytes().to_vec();

        let fixed = der_to_fixed(&der_bytes).unwrap();
        assert_eq!(fixed.as_slice(), signature.to_bytes().as_slice());
        assert_eq!(fixed_to_der(&fixed).unwrap(), der_bytes);
    }

    #[test]
    fn test_signature_conversion_errors() {
        assert!(matches!(fixed_to_der(&[1u8; 63]), Err(KeyError::InvalidSignature(_))));
        // r = 0 is not a valid scalar.
        assert!(matches!(fixed_to_der(&[0u8; 64]), Err(KeyError::InvalidSignature(_))));
        assert!(matches!(der_to_fixed(&[0x30, 0x00]), Err(KeyError::InvalidSignature(_))));
    }

    #[test]
    fn test_ecdh_and_hkdf_agree() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        let salt = EphemeralKeyPair::generate().public_key_encoded().to_vec();

        let a_secret = a.agree(&decode_public_key(b.public_key_encoded()).unwrap());
        let b_secret = b.agree(&decode_public_key(a.public_key_encoded()).unwrap());
        assert_eq!(*a_secret, *b_secret);

        let ka = derive_session_key(&a_secret, &salt).unwrap();
        let kb = derive_session_key(&b_secret, &salt).unwrap();
        assert_eq!(ka, kb);

        let other_salt = derive_session_key(&a_secret, b"different salt").unwrap();
        assert_ne!(ka, other_salt);
    }

    #[test]
    fn test_session_key_debug_is_redacted() {
        let key = SessionKey::from_bytes([7u8; SESSION_KEY_LEN]);
        assert_eq!(format!("{key:?}"), "SessionKey(..)");
    }

    #[test]
    fn test_ephemeral_debug_shows_key_prefix() {
        let pair = EphemeralKeyPair::generate();
        let prefix = hex::encode(&pair.public_key_encoded()[..8]);
        let debug = format!("{pair:?}");
        assert!(debug.contains(&prefix));
        assert!(debug.starts_with("EphemeralKeyPair"));
        assert_eq!(hex_prefix(&[0xab, 0x01]), "ab01");
    }
}
