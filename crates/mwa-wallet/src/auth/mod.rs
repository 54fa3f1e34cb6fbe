//! Authorization tokens and the repository that issues them.

pub mod clock;
pub mod keys;
pub mod records;
mod repository;
pub(crate) mod store;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use keys::{
    FileKeyProvider, InMemoryKeyProvider, KeyProviderError, SecureKeyProvider, WrappingKey,
    AUTH_TOKEN_SECRET_KEY_NAME,
};
pub use records::{AccountRecord, AuthRecord, IdentityRecord, NewAccount};
pub use repository::AuthRepository;
pub use store::SweepStats;
pub use token::{TokenClaims, TokenError};
