//! Auth token wire form.
//!
//! ```text
//! token = base64( envelope JSON || HMAC-SHA256(identity secret, envelope JSON) )
//! ```
//!
//! The envelope names the identity and auth record it refers to. Decoding
//! does not need the secret; verification does, and the secret belongs to
//! the identity named in the envelope.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Content-type tag carried in every envelope.
pub const TOKEN_TYPE: &str = "mwa-auth-token/v1";

/// HMAC-SHA256 tag length.
pub const TAG_LEN: usize = 32;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not valid base64")]
    Encoding,

    #[error("token too short")]
    TooShort,

    #[error("malformed token envelope")]
    Malformed,

    #[error("unsupported token type: {0}")]
    UnsupportedType(String),

    #[error("invalid HMAC key")]
    InvalidKey,
}

/// What a token points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenClaims {
    pub identity_id: i64,
    pub auth_record_id: i64,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    token_type: String,
    identity_id: i64,
    auth_record_id: i64,
}

/// A token split into its parts, not yet verified.
#[derive(Debug, Clone)]
pub struct DecodedToken {
    pub claims: TokenClaims,
    payload: Vec<u8>,
    tag: Vec<u8>,
}

impl DecodedToken {
    /// Check the tag against `secret` in constant time.
    pub fn verify(&self, secret: &[u8]) -> bool {
        let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
            return false;
        };
        mac.update(&self.payload);
        mac.verify_slice(&self.tag).is_ok()
    }
}

/// Build a token for `claims`, tagged with `secret`.
pub fn encode(claims: TokenClaims, secret: &[u8]) -> Result<String, TokenError> {
    let payload = serde_json::to_vec(&Envelope {
        token_type: TOKEN_TYPE.to_string(),
        identity_id: claims.identity_id,
        auth_record_id: claims.auth_record_id,
    })
    .map_err(|_| TokenError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::InvalidKey)?;
    mac.update(&payload);
    let tag = mac.finalize().into_bytes();

    let mut bytes = payload;
    bytes.extend_from_slice(&tag);
    Ok(STANDARD.encode(bytes))
}

/// Split a token into claims and tag without verifying it.
pub fn decode(token: &str) -> Result<DecodedToken, TokenError> {
    let bytes = STANDARD.decode(token).map_err(|_| TokenError::Encoding)?;
    if bytes.len() <= TAG_LEN {
        return Err(TokenError::TooShort);
    }
    let (payload, tag) = bytes.split_at(bytes.len() - TAG_LEN);

    let envelope: Envelope = serde_json::from_slice(payload).map_err(|_| TokenError::Malformed)?;
    if envelope.token_type != TOKEN_TYPE {
        return Err(TokenError::UnsupportedType(envelope.token_type));
    }

    Ok(DecodedToken {
        claims: TokenClaims {
            identity_id: envelope.identity_id,
            auth_record_id: envelope.auth_record_id,
        },
        payload: payload.to_vec(),
        tag: tag.to_vec(),
    })
}
