//! Mobile Wallet Adapter wire types shared by the client and the wallet.
//!
//! These are the typed `params`/`result` shapes carried inside JSON-RPC
//! envelopes. Binary payloads, addresses and signatures travel as standard
//! base64 strings.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::helpers::is_absolute_uri;

/// JSON-RPC method names.
pub mod methods {
    pub const AUTHORIZE: &str = "authorize";
    pub const REAUTHORIZE: &str = "reauthorize";
    pub const DEAUTHORIZE: &str = "deauthorize";
    pub const GET_CAPABILITIES: &str = "get_capabilities";
    pub const SIGN_TRANSACTIONS: &str = "sign_transactions";
    pub const SIGN_MESSAGES: &str = "sign_messages";
    pub const SIGN_AND_SEND_TRANSACTIONS: &str = "sign_and_send_transactions";
}

/// Protocol-specific JSON-RPC error codes (application-defined range).
pub mod error_codes {
    pub const AUTHORIZATION_FAILED: i32 = -1;
    pub const INVALID_PAYLOADS: i32 = -2;
    pub const NOT_SIGNED: i32 = -3;
    pub const NOT_SUBMITTED: i32 = -4;
    pub const NOT_CLONED: i32 = -5;
    pub const TOO_MANY_PAYLOADS: i32 = -6;
    pub const CHAIN_NOT_SUPPORTED: i32 = -7;
}

/// Wallet feature identifiers reported by `get_capabilities`.
pub mod features {
    pub const SIGN_AND_SEND_TRANSACTION: &str = "solana:signAndSendTransaction";
    pub const SIGN_TRANSACTIONS: &str = "solana:signTransactions";
    pub const SIGN_MESSAGES: &str = "solana:signMessages";
    pub const SIGN_IN_WITH_SOLANA: &str = "solana:signInWithSolana";
    pub const CLONE_AUTHORIZATION: &str = "solana:cloneAuthorization";
}

/// Chain identifiers.
pub mod chains {
    pub const MAINNET: &str = "solana:mainnet";
    pub const TESTNET: &str = "solana:testnet";
    pub const DEVNET: &str = "solana:devnet";

    /// Map a legacy `cluster` name onto its chain identifier.
    pub fn from_legacy_cluster(cluster: &str) -> Option<&'static str> {
        match cluster {
            "mainnet-beta" => Some(MAINNET),
            "testnet" => Some(TESTNET),
            "devnet" => Some(DEVNET),
            _ => None,
        }
    }
}

/// Encode a binary payload for the wire.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a wire payload.
pub fn decode_base64(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(value)
}

/// Decode every payload, returning the index of the first undecodable one.
pub fn decode_base64_all(values: &[String]) -> Result<Vec<Vec<u8>>, usize> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| decode_base64(v).map_err(|_| i))
        .collect()
}

/// Identity a dapp presents when asking for authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Absolute origin URI of the dapp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Icon path, relative to `uri`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl AppIdentity {
    /// Check the URI shape rules: `uri` absolute, `icon` relative.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(uri) = &self.uri {
            if !is_absolute_uri(uri) {
                return Err(format!("identity uri must be absolute: {uri}"));
            }
        }
        if let Some(icon) = &self.icon {
            if is_absolute_uri(icon) {
                return Err(format!("identity icon must be relative: {icon}"));
            }
        }
        Ok(())
    }
}

/// `authorize` params.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeParams {
    #[serde(default)]
    pub identity: AppIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    /// Legacy cluster name, superseded by `chain`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,
    /// Sign-In-With-Solana payload, passed through to the wallet untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_in_payload: Option<serde_json::Value>,
}

impl AuthorizeParams {
    /// The chain this request targets. `chain` wins over `cluster`; with
    /// neither, mainnet is assumed.
    pub fn resolved_chain(&self) -> Result<String, String> {
        if let Some(chain) = &self.chain {
            return Ok(chain.clone());
        }
        match &self.cluster {
            Some(cluster) => chains::from_legacy_cluster(cluster)
                .map(str::to_string)
                .ok_or_else(|| format!("unknown cluster: {cluster}")),
            None => Ok(chains::MAINNET.to_string()),
        }
    }
}

/// One account granted by an authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedAccount {
    /// Base64 of the raw public key.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_address_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

/// Outcome of a Sign-In-With-Solana request, opaque to this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInResult {
    pub address: String,
    pub signed_message: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_type: Option<String>,
}

/// `authorize` / `reauthorize` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResult {
    pub auth_token: String,
    pub accounts: Vec<AuthorizedAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_uri_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_in_result: Option<SignInResult>,
}

/// `reauthorize` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReauthorizeParams {
    #[serde(default)]
    pub identity: AppIdentity,
    pub auth_token: String,
}

/// `deauthorize` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeauthorizeParams {
    pub auth_token: String,
}

/// Marker for the literal `"legacy"` transaction version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyVersion {
    Legacy,
}

/// A supported transaction version: `"legacy"` or a version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionVersion {
    Legacy(LegacyVersion),
    Versioned(u8),
}

impl TransactionVersion {
    pub const LEGACY: Self = Self::Legacy(LegacyVersion::Legacy);
    pub const V0: Self = Self::Versioned(0);
}

/// `get_capabilities` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCapabilitiesResult {
    pub max_transactions_per_request: u32,
    pub max_messages_per_request: u32,
    pub supported_transaction_versions: Vec<TransactionVersion>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub supports_clone_authorization: bool,
    #[serde(default)]
    pub supports_sign_and_send_transactions: bool,
}

/// `sign_transactions` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignPayloadsParams {
    pub payloads: Vec<String>,
    /// Only sent by clients that predate session-scoped authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// `sign_messages` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignMessagesParams {
    pub payloads: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Submission options for `sign_and_send_transactions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignAndSendOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_context_slot: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_preflight: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_commitment_to_send_next_transaction: Option<bool>,
}

/// `sign_and_send_transactions` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignAndSendTransactionsParams {
    pub payloads: Vec<String>,
    #[serde(default)]
    pub options: SignAndSendOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// `sign_transactions` / `sign_messages` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayloadsResult {
    pub signed_payloads: Vec<String>,
}

/// `sign_and_send_transactions` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignAndSendTransactionsResult {
    pub signatures: Vec<String>,
}

/// `data` attached to an invalid-payloads error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidPayloadsData {
    pub valid: Vec<bool>,
}

/// `data` attached to a not-submitted error. `None` marks a transaction
/// that was never signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotSubmittedData {
    pub signatures: Vec<Option<String>>,
}
