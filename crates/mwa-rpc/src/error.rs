//! JSON-RPC layer errors.

use std::time::Duration;

use thiserror::Error;

use mwa_common::transport::TransportError;

use crate::message::JsonRpcError;

/// Outcome of a failed client call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonRpcClientError {
    /// Another request has not completed yet.
    #[error("request {0} is still in flight")]
    RequestInFlight(i64),

    #[error("invalid method name: {0:?}")]
    InvalidMethod(String),

    #[error("params must be an object or an array")]
    InvalidParams,

    #[error("request {id} timed out after {timeout:?}")]
    Timeout { id: i64, timeout: Duration },

    #[error("request {0} was cancelled")]
    Cancelled(i64),

    /// The server answered with an error object.
    #[error(transparent)]
    Remote(JsonRpcError),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The client was closed while the request was outstanding.
    #[error("client closed")]
    Closed,
}

impl JsonRpcClientError {
    /// Whether this is a caller bug rather than a remote failure.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::RequestInFlight(_) | Self::InvalidMethod(_) | Self::InvalidParams
        )
    }
}

/// Server method table errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JsonRpcServerError {
    #[error("method already registered: {0}")]
    DuplicateMethod(String),

    #[error("method name not allowed: {0:?}")]
    ReservedMethod(String),
}
