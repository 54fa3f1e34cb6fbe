//! Secure key provider and at-rest secret wrapping.
//!
//! Identity HMAC secrets never sit in the repository in the clear. They are
//! wrapped with AES-256-GCM under a key obtained from a
//! [`SecureKeyProvider`], which stands in for the platform keystore:
//!
//! ```text
//! wrapped = [12 bytes: nonce] [ciphertext || 16-byte tag]
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Provider key name under which identity secrets are wrapped.
pub const AUTH_TOKEN_SECRET_KEY_NAME: &str = "mwa-auth-token-secret";

pub const WRAPPING_KEY_LEN: usize = 32;
const WRAP_NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum KeyProviderError {
    #[error("key store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored key {0} is corrupt")]
    Corrupt(String),

    #[error("invalid key name: {0:?}")]
    InvalidName(String),

    #[error("failed to wrap secret")]
    WrapFailed,

    #[error("failed to unwrap secret")]
    UnwrapFailed,
}

/// AES-256 key handed out by a provider. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WrappingKey([u8; WRAPPING_KEY_LEN]);

impl WrappingKey {
    pub fn from_bytes(bytes: [u8; WRAPPING_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; WRAPPING_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Encrypt `secret` for storage.
    pub fn wrap(&self, secret: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
        let cipher = Aes256Gcm::new((&self.0).into());
        let mut nonce = [0u8; WRAP_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), secret)
            .map_err(|_| KeyProviderError::WrapFailed)?;

        let mut wrapped = Vec::with_capacity(WRAP_NONCE_LEN + ciphertext.len());
        wrapped.extend_from_slice(&nonce);
        wrapped.extend_from_slice(&ciphertext);
        Ok(wrapped)
    }

    /// Decrypt a value produced by [`WrappingKey::wrap`].
    pub fn unwrap_secret(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyProviderError> {
        if wrapped.len() < WRAP_NONCE_LEN {
            return Err(KeyProviderError::UnwrapFailed);
        }
        let (nonce, ciphertext) = wrapped.split_at(WRAP_NONCE_LEN);
        let cipher = Aes256Gcm::new((&self.0).into());
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| KeyProviderError::UnwrapFailed)
    }
}

impl std::fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WrappingKey(..)")
    }
}

/// Named symmetric keys held by a secure backend.
pub trait SecureKeyProvider: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<WrappingKey>, KeyProviderError>;

    /// Create (or replace) the key called `name`.
    fn create(&self, name: &str) -> Result<WrappingKey, KeyProviderError>;

    fn get_or_create(&self, name: &str) -> Result<WrappingKey, KeyProviderError> {
        match self.get(name)? {
            Some(key) => Ok(key),
            None => self.create(name),
        }
    }
}

/// Process-local provider. Keys are lost when it is dropped.
#[derive(Default)]
pub struct InMemoryKeyProvider {
    keys: Mutex<HashMap<String, WrappingKey>>,
}

impl InMemoryKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureKeyProvider for InMemoryKeyProvider {
    fn get(&self, name: &str) -> Result<Option<WrappingKey>, KeyProviderError> {
        let keys = self.keys.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(keys.get(name).cloned())
    }

    fn create(&self, name: &str) -> Result<WrappingKey, KeyProviderError> {
        let key = WrappingKey::generate();
        self.keys
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.to_string(), key.clone());
        debug!(name, "created in-memory wrapping key");
        Ok(key)
    }
}

/// Keys stored hex-encoded, one file per name, readable only by the owner.
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    dir: PathBuf,
}

impl FileKeyProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, KeyProviderError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(KeyProviderError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.key")))
    }
}

impl SecureKeyProvider for FileKeyProvider {
    fn get(&self, name: &str) -> Result<Option<WrappingKey>, KeyProviderError> {
        let path = self.path_for(name)?;
        let encoded = match fs::read_to_string(&path) {
            Ok(s) => Zeroizing::new(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let bytes = Zeroizing::new(
            hex::decode(encoded.trim()).map_err(|_| KeyProviderError::Corrupt(name.to_string()))?,
        );
        let mut key = [0u8; WRAPPING_KEY_LEN];
        if bytes.len() != WRAPPING_KEY_LEN {
            return Err(KeyProviderError::Corrupt(name.to_string()));
        }
        key.copy_from_slice(&bytes);
        let wrapping = WrappingKey::from_bytes(key);
        key.zeroize();
        Ok(Some(wrapping))
    }

    fn create(&self, name: &str) -> Result<WrappingKey, KeyProviderError> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.dir)?;

        let key = WrappingKey::generate();
        let encoded = Zeroizing::new(hex::encode(&key.0));
        write_private(&path, encoded.as_bytes())?;
        info!(path = %path.display(), "created wrapping key");
        Ok(key)
    }
}

/// Write a file readable only by the owner (0600 on Unix). New files are
/// created with that mode; an existing file is tightened before any bytes
/// are written.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_roundtrip() {
        let key = WrappingKey::generate();
        let wrapped = key.wrap(b"identity secret").unwrap();
        assert_ne!(&wrapped[WRAP_NONCE_LEN..], b"identity secret");
        assert_eq!(key.unwrap_secret(&wrapped).unwrap().as_slice(), b"identity secret");

        let other = WrappingKey::generate();
        assert!(matches!(
            other.unwrap_secret(&wrapped),
            Err(KeyProviderError::UnwrapFailed)
        ));
        assert!(key.unwrap_secret(&wrapped[..4]).is_err());
    }

    #[test]
    fn test_in_memory_get_or_create() {
        let provider = InMemoryKeyProvider::new();
        assert!(provider.get(AUTH_TOKEN_SECRET_KEY_NAME).unwrap().is_none());

        let created = provider.get_or_create(AUTH_TOKEN_SECRET_KEY_NAME).unwrap();
        let fetched = provider.get_or_create(AUTH_TOKEN_SECRET_KEY_NAME).unwrap();
        let wrapped = created.wrap(b"s").unwrap();
        assert_eq!(fetched.unwrap_secret(&wrapped).unwrap().as_slice(), b"s");
    }

    #[test]
    fn test_file_provider_persists() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileKeyProvider::new(dir.path().join("keys"));
        assert!(provider.get(AUTH_TOKEN_SECRET_KEY_NAME).unwrap().is_none());

        let created = provider.create(AUTH_TOKEN_SECRET_KEY_NAME).unwrap();
        let wrapped = created.wrap(b"secret").unwrap();

        let reopened = FileKeyProvider::new(dir.path().join("keys"));
        let loaded = reopened.get(AUTH_TOKEN_SECRET_KEY_NAME).unwrap().unwrap();
        assert_eq!(loaded.unwrap_secret(&wrapped).unwrap().as_slice(), b"secret");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let path = dir.path().join("keys").join("mwa-auth-token-secret.key");
            let mode = fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_write_private_tightens_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leftover.key");
        fs::write(&path, b"old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        write_private(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let fresh = dir.path().join("fresh.key");
        write_private(&fresh, b"k").unwrap();
        let mode = fs::metadata(&fresh).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_provider_rejects_bad_names() {
        let provider = FileKeyProvider::new("/nonexistent");
        assert!(matches!(
            provider.get("../escape"),
            Err(KeyProviderError::InvalidName(_))
        ));
        assert!(matches!(provider.get(""), Err(KeyProviderError::InvalidName(_))));
    }
}
