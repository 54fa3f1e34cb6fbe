//! JSON-RPC 2.0 correlation layer for MWA sessions.
//!
//! The client side allows one outstanding request at a time, with optional
//! timeout and external cancellation. The server side validates the
//! envelope, rejects reserved method names and dispatches to typed
//! handlers. Neither side knows about encryption: both exchange plaintext
//! through [`mwa_common::MessageSender`].

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod message;
pub mod server;

pub use client::{JsonRpcClient, PendingResponse, RequestCanceller};
pub use error::{JsonRpcClientError, JsonRpcServerError};
pub use message::{error_codes, JsonRpcError, JsonRpcId, JsonRpcRequest, JsonRpcResponse};
pub use server::{JsonRpcServer, RpcMethod};
