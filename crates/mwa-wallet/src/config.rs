//! Wallet configuration.
//!
//! Both structs deserialize from JSON (missing fields take their defaults)
//! and can be overridden from the environment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use mwa_common::config::{env_bool, env_u32, env_u64, load_json_file};
use mwa_common::protocol::{chains, features, TransactionVersion};
use mwa_common::{Error, Result};
use mwa_crypto::ProtocolVersion;

/// Token issuance and retention policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthIssuerConfig {
    /// Authorizations kept per identity before the oldest are purged.
    pub max_outstanding_tokens_per_identity: u32,
    /// How long an authorization may be used for privileged methods.
    pub authorization_validity_secs: u64,
    /// How long a token may still be exchanged via `reauthorize`.
    pub reauthorization_validity_secs: u64,
    /// Window after issuance in which `reauthorize` returns the same record.
    pub reauthorization_nop_secs: u64,
}

impl Default for AuthIssuerConfig {
    fn default() -> Self {
        Self {
            max_outstanding_tokens_per_identity: 50,
            authorization_validity_secs: 60 * 60,
            reauthorization_validity_secs: 30 * 24 * 60 * 60,
            reauthorization_nop_secs: 10 * 60,
        }
    }
}

impl AuthIssuerConfig {
    /// Defaults with `MWA_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Self {
        Self {
            max_outstanding_tokens_per_identity: env_u32(
                "MWA_MAX_OUTSTANDING_TOKENS",
                self.max_outstanding_tokens_per_identity,
            ),
            authorization_validity_secs: env_u64(
                "MWA_AUTHORIZATION_VALIDITY_SECS",
                self.authorization_validity_secs,
            ),
            reauthorization_validity_secs: env_u64(
                "MWA_REAUTHORIZATION_VALIDITY_SECS",
                self.reauthorization_validity_secs,
            ),
            reauthorization_nop_secs: env_u64(
                "MWA_REAUTHORIZATION_NOP_SECS",
                self.reauthorization_nop_secs,
            ),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_json_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_outstanding_tokens_per_identity == 0 {
            return Err(Error::config(
                "max_outstanding_tokens_per_identity must be at least 1",
            ));
        }
        if self.authorization_validity_secs == 0 {
            return Err(Error::config("authorization_validity_secs must be positive"));
        }
        if self.reauthorization_nop_secs > self.reauthorization_validity_secs {
            return Err(Error::config(
                "reauthorization_nop_secs exceeds reauthorization_validity_secs",
            ));
        }
        Ok(())
    }
}

/// Limits and features advertised by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub max_transactions_per_request: u32,
    pub max_messages_per_request: u32,
    pub supported_transaction_versions: Vec<TransactionVersion>,
    /// Feature ids advertised in `get_capabilities`.
    pub optional_features: Vec<String>,
    /// Chains `authorize` accepts.
    pub supported_chains: Vec<String>,
    pub supports_sign_and_send_transactions: bool,
    /// Advertised in HELLO_RSP session properties; `None` keeps the
    /// session legacy.
    pub protocol_version: Option<ProtocolVersion>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            max_transactions_per_request: 10,
            max_messages_per_request: 10,
            supported_transaction_versions: vec![
                TransactionVersion::LEGACY,
                TransactionVersion::V0,
            ],
            optional_features: vec![
                features::SIGN_AND_SEND_TRANSACTION.to_string(),
                features::SIGN_TRANSACTIONS.to_string(),
                features::SIGN_MESSAGES.to_string(),
            ],
            supported_chains: vec![
                chains::MAINNET.to_string(),
                chains::TESTNET.to_string(),
                chains::DEVNET.to_string(),
            ],
            supports_sign_and_send_transactions: true,
            protocol_version: Some(ProtocolVersion::V1),
        }
    }
}

impl WalletConfig {
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Self {
        Self {
            max_transactions_per_request: env_u32(
                "MWA_MAX_TRANSACTIONS_PER_REQUEST",
                self.max_transactions_per_request,
            ),
            max_messages_per_request: env_u32(
                "MWA_MAX_MESSAGES_PER_REQUEST",
                self.max_messages_per_request,
            ),
            supports_sign_and_send_transactions: env_bool(
                "MWA_SUPPORTS_SIGN_AND_SEND",
                self.supports_sign_and_send_transactions,
            ),
            ..self
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_json_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_transactions_per_request == 0 || self.max_messages_per_request == 0 {
            return Err(Error::config("per-request payload limits must be at least 1"));
        }
        if self.supported_chains.is_empty() {
            return Err(Error::config("supported_chains must not be empty"));
        }
        Ok(())
    }

    pub fn supports_chain(&self, chain: &str) -> bool {
        self.supported_chains.iter().any(|c| c == chain)
    }

    pub fn supports_feature(&self, feature: &str) -> bool {
        self.optional_features.iter().any(|f| f == feature)
    }

    /// Features reported by `get_capabilities`. Sign-and-send is only
    /// listed when the method is actually served.
    pub fn advertised_features(&self) -> Vec<String> {
        self.optional_features
            .iter()
            .filter(|f| {
                self.supports_sign_and_send_transactions
                    || f.as_str() != features::SIGN_AND_SEND_TRANSACTION
            })
            .cloned()
            .collect()
    }
}
