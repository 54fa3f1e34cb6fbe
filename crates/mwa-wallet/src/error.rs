//! Wallet-side errors.

use thiserror::Error;

use crate::auth::keys::KeyProviderError;
use crate::auth::token::TokenError;

/// Authorization repository errors.
///
/// Token verification failures are not errors: they surface as "no
/// record". These are the failures of the repository itself.
#[derive(Debug, Error)]
pub enum AuthRepoError {
    #[error("key provider error: {0}")]
    KeyProvider(#[from] KeyProviderError),

    #[error("token error: {0}")]
    Token(#[from] TokenError),

    #[error("snapshot I/O error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("snapshot is corrupt: {0}")]
    CorruptSnapshot(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("unknown authorization {0}")]
    UnknownAuthorization(i64),
}

/// Why a scenario did not reach or stay in the encrypted state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScenarioError {
    #[error("session closed")]
    Closed,

    #[error("session failed: {0}")]
    Failed(String),
}
