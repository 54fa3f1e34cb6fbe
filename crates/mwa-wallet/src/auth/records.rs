//! Immutable snapshots handed out by the repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mwa_common::protocol::{encode_base64, AuthorizedAccount};

/// A dapp identity. The HMAC secret never leaves the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: i64,
    pub name: Option<String>,
    pub uri: Option<String>,
    pub icon: Option<String>,
}

/// One account granted by an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: i64,
    pub parent_id: i64,
    pub public_key: Vec<u8>,
    pub display_address: Option<String>,
    pub display_address_format: Option<String>,
    pub label: Option<String>,
    pub icon: Option<String>,
    pub chains: Option<Vec<String>>,
    pub features: Option<Vec<String>>,
}

impl AccountRecord {
    pub fn to_authorized_account(&self) -> AuthorizedAccount {
        AuthorizedAccount {
            address: encode_base64(&self.public_key),
            display_address: self.display_address.clone(),
            display_address_format: self.display_address_format.clone(),
            label: self.label.clone(),
            icon: self.icon.clone(),
            chains: self.chains.clone(),
            features: self.features.clone(),
        }
    }
}

/// Account details supplied when issuing an authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewAccount {
    pub public_key: Vec<u8>,
    pub display_address: Option<String>,
    pub display_address_format: Option<String>,
    pub label: Option<String>,
    pub icon: Option<String>,
    pub chains: Option<Vec<String>>,
    pub features: Option<Vec<String>>,
}

impl NewAccount {
    pub fn new(public_key: impl Into<Vec<u8>>) -> Self {
        Self {
            public_key: public_key.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl From<&AccountRecord> for NewAccount {
    fn from(account: &AccountRecord) -> Self {
        Self {
            public_key: account.public_key.clone(),
            display_address: account.display_address.clone(),
            display_address_format: account.display_address_format.clone(),
            label: account.label.clone(),
            icon: account.icon.clone(),
            chains: account.chains.clone(),
            features: account.features.clone(),
        }
    }
}

/// One issued authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub id: i64,
    pub identity: IdentityRecord,
    pub chain: String,
    /// Wallet-defined scope, opaque here.
    pub scope: Vec<u8>,
    pub wallet_uri_base: Option<String>,
    pub issued: DateTime<Utc>,
    /// End of the authorization validity window.
    pub expires: DateTime<Utc>,
    pub revoked: bool,
    pub accounts: Vec<AccountRecord>,
}

impl AuthRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }

    /// Usable for privileged methods right now.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now) && self.issued <= now
    }

    pub fn authorized_accounts(&self) -> Vec<AuthorizedAccount> {
        self.accounts
            .iter()
            .map(AccountRecord::to_authorized_account)
            .collect()
    }

    /// Whether `public_key` is one of this authorization's accounts.
    pub fn has_account(&self, public_key: &[u8]) -> bool {
        self.accounts.iter().any(|a| a.public_key == public_key)
    }
}
