//! Shared utilities for MWA: wire types, configuration, logging, error types.
//!
//! This crate provides common infrastructure used by both the client
//! (dapp) and wallet sides of a Mobile Wallet Adapter association.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod helpers;
pub mod protocol;
pub mod transport;

pub use error::{Error, Result};
pub use transport::{MessageSender, TransportError};

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
