//! The wallet's privileged-operation collaborator.
//!
//! The dispatcher handles protocol and authorization; anything that needs
//! the user or the wallet's keys goes through [`WalletDelegate`].

use serde_json::json;
use thiserror::Error;

use mwa_common::protocol::{
    encode_base64, error_codes, AppIdentity, InvalidPayloadsData, NotSubmittedData,
    SignAndSendOptions, SignInResult,
};
use mwa_rpc::JsonRpcError;

use crate::auth::{AuthRecord, NewAccount};

/// An `authorize` request as presented to the wallet.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub identity: AppIdentity,
    pub chain: String,
    pub features: Vec<String>,
    /// Accounts the dapp asked for, decoded.
    pub addresses: Vec<Vec<u8>>,
    pub sign_in_payload: Option<serde_json::Value>,
}

/// The wallet's answer to an [`AuthorizeRequest`].
#[derive(Debug, Clone)]
pub enum AuthorizeDecision {
    Approved {
        accounts: Vec<NewAccount>,
        wallet_uri_base: Option<String>,
        scope: Vec<u8>,
        sign_in_result: Option<SignInResult>,
    },
    Declined,
}

#[derive(Debug, Clone)]
pub struct SignTransactionsRequest {
    pub authorization: AuthRecord,
    pub payloads: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct SignMessagesRequest {
    pub authorization: AuthRecord,
    pub payloads: Vec<Vec<u8>>,
    pub addresses: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct SignAndSendTransactionsRequest {
    pub authorization: AuthRecord,
    pub payloads: Vec<Vec<u8>>,
    pub options: SignAndSendOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DelegateError {
    #[error("request declined")]
    Declined,

    #[error("invalid payloads")]
    InvalidPayloads { valid: Vec<bool> },

    #[error("transactions not submitted")]
    NotSubmitted { signatures: Vec<Option<Vec<u8>>> },

    #[error("too many payloads")]
    TooManyPayloads,

    #[error("wallet error: {0}")]
    Internal(String),
}

impl DelegateError {
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::Declined => JsonRpcError::new(error_codes::NOT_SIGNED, "request declined"),
            Self::InvalidPayloads { valid } => {
                JsonRpcError::new(error_codes::INVALID_PAYLOADS, "invalid payloads")
                    .with_data(json!(InvalidPayloadsData {
                        valid: valid.clone()
                    }))
            }
            Self::NotSubmitted { signatures } => {
                let data = NotSubmittedData {
                    signatures: signatures
                        .iter()
                        .map(|s| s.as_deref().map(encode_base64))
                        .collect(),
                };
                JsonRpcError::new(error_codes::NOT_SUBMITTED, "transactions not submitted")
                    .with_data(json!(data))
            }
            Self::TooManyPayloads => {
                JsonRpcError::new(error_codes::TOO_MANY_PAYLOADS, "too many payloads")
            }
            Self::Internal(message) => JsonRpcError::internal_error(message.clone()),
        }
    }
}

/// Wallet-side decisions and signing.
///
/// Each signing method must return exactly one output per payload.
#[async_trait::async_trait]
pub trait WalletDelegate: Send + Sync {
    async fn authorize(&self, request: &AuthorizeRequest) -> AuthorizeDecision;

    /// Confirm a token exchange. Wallets normally accept silently.
    async fn reauthorize(&self, _authorization: &AuthRecord, _identity: &AppIdentity) -> bool {
        true
    }

    async fn sign_transactions(
        &self,
        request: &SignTransactionsRequest,
    ) -> Result<Vec<Vec<u8>>, DelegateError>;

    async fn sign_messages(&self, request: &SignMessagesRequest)
        -> Result<Vec<Vec<u8>>, DelegateError>;

    /// Returns one transaction signature per payload.
    async fn sign_and_send_transactions(
        &self,
        request: &SignAndSendTransactionsRequest,
    ) -> Result<Vec<Vec<u8>>, DelegateError>;
}
