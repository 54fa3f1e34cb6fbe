//! Configuration helpers.
//!
//! Configuration structs live next to the code they configure; this module
//! only holds the shared plumbing: environment overrides and JSON files.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Read a boolean flag from the environment (`1`, `true`, `yes`, `on`).
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Read a `u32` from the environment, falling back to `default` when unset
/// or unparsable.
pub fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

/// Read a `u64` from the environment, falling back to `default` when unset
/// or unparsable.
pub fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Load a JSON config file into `T`.
pub fn load_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::config(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_fallbacks() {
        assert_eq!(env_u32("MWA_TEST_UNSET_U32", 7), 7);
        assert_eq!(env_u64("MWA_TEST_UNSET_U64", 9), 9);
        assert!(env_bool("MWA_TEST_UNSET_BOOL", true));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("MWA_TEST_SET_U32", " 42 ");
        assert_eq!(env_u32("MWA_TEST_SET_U32", 7), 42);
        std::env::set_var("MWA_TEST_SET_U32_BAD", "forty-two");
        assert_eq!(env_u32("MWA_TEST_SET_U32_BAD", 7), 7);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result: Result<serde_json::Value> = load_json_file("/nonexistent/mwa.json");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
