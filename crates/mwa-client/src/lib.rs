//! Dapp side of a Mobile Wallet Adapter association.
//!
//! [`LocalClientScenario`] owns the initiator session and hands out a
//! [`MobileWalletAdapterClient`] for the typed MWA methods.

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod scenario;

pub use client::MobileWalletAdapterClient;
pub use error::{ClientError, ScenarioError};
pub use scenario::LocalClientScenario;
