//! Wallet side of a Mobile Wallet Adapter association.
//!
//! - [`auth`]: auth-token issuance, verification and retention
//! - [`dispatcher`]: the MWA JSON-RPC methods for one session
//! - [`delegate`]: the wallet's own decisions and signing
//! - [`scenario`]: a responder session wired to a dispatcher

#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod delegate;
pub mod dispatcher;
pub mod error;
pub mod scenario;

pub use auth::{AuthRecord, AuthRepository, NewAccount};
pub use config::{AuthIssuerConfig, WalletConfig};
pub use delegate::{
    AuthorizeDecision, AuthorizeRequest, DelegateError, SignAndSendTransactionsRequest,
    SignMessagesRequest, SignTransactionsRequest, WalletDelegate,
};
pub use dispatcher::MwaDispatcher;
pub use error::{AuthRepoError, ScenarioError};
pub use scenario::LocalWalletScenario;
