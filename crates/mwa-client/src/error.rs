//! Client-side errors.

use thiserror::Error;

use mwa_common::protocol::{error_codes, InvalidPayloadsData, NotSubmittedData};
use mwa_rpc::{JsonRpcClientError, JsonRpcError};

/// Failure of a typed wallet call.
///
/// Protocol error codes the wallet returns map to their own variants;
/// anything else stays a [`ClientError::Remote`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// Rejected locally before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("invalid payloads: {message}")]
    InvalidPayloads { message: String, valid: Vec<bool> },

    #[error("not signed: {0}")]
    NotSigned(String),

    /// `signatures` holds base64 signatures, `None` for unsigned entries.
    #[error("not submitted: {message}")]
    NotSubmitted {
        message: String,
        signatures: Vec<Option<String>>,
    },

    #[error("authorization not cloned: {0}")]
    NotCloned(String),

    #[error("too many payloads: {0}")]
    TooManyPayloads(String),

    #[error("chain not supported: {0}")]
    ChainNotSupported(String),

    #[error(transparent)]
    Remote(JsonRpcError),

    /// The wallet answered, but not with what the method promises.
    #[error("invalid result: {0}")]
    InvalidResult(String),

    #[error(transparent)]
    Rpc(JsonRpcClientError),
}

impl From<JsonRpcError> for ClientError {
    fn from(error: JsonRpcError) -> Self {
        let JsonRpcError {
            code,
            message,
            data,
        } = error;
        match code {
            error_codes::AUTHORIZATION_FAILED => Self::AuthorizationFailed(message),
            error_codes::INVALID_PAYLOADS => {
                let valid = data
                    .and_then(|d| serde_json::from_value::<InvalidPayloadsData>(d).ok())
                    .map(|d| d.valid)
                    .unwrap_or_default();
                Self::InvalidPayloads { message, valid }
            }
            error_codes::NOT_SIGNED => Self::NotSigned(message),
            error_codes::NOT_SUBMITTED => {
                let signatures = data
                    .and_then(|d| serde_json::from_value::<NotSubmittedData>(d).ok())
                    .map(|d| d.signatures)
                    .unwrap_or_default();
                Self::NotSubmitted {
                    message,
                    signatures,
                }
            }
            error_codes::NOT_CLONED => Self::NotCloned(message),
            error_codes::TOO_MANY_PAYLOADS => Self::TooManyPayloads(message),
            error_codes::CHAIN_NOT_SUPPORTED => Self::ChainNotSupported(message),
            _ => Self::Remote(JsonRpcError {
                code,
                message,
                data,
            }),
        }
    }
}

impl From<JsonRpcClientError> for ClientError {
    fn from(error: JsonRpcClientError) -> Self {
        match error {
            JsonRpcClientError::Remote(remote) => remote.into(),
            other => Self::Rpc(other),
        }
    }
}

/// Why a scenario did not reach or stay in the encrypted state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScenarioError {
    #[error("session closed")]
    Closed,

    #[error("session failed: {0}")]
    Failed(String),
}
