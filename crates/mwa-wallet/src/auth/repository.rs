//! Authorization repository.
//!
//! Issues, verifies, reissues and revokes auth tokens. All mutations run
//! under one lock so a purge and its sweep are atomic with respect to
//! concurrent issuance.
//!
//! Token verification never says why a token was refused: every failure is
//! `Ok(None)`. The reason is logged locally. Authentic tokens that are
//! future-dated or past the reauthorization window also revoke their record
//! as a side effect.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use mwa_common::protocol::AppIdentity;

use super::clock::{Clock, SystemClock};
use super::keys::{InMemoryKeyProvider, SecureKeyProvider, WrappingKey, AUTH_TOKEN_SECRET_KEY_NAME};
use super::records::{AuthRecord, IdentityRecord, NewAccount};
use super::store::Tables;
use super::token::{self, TokenClaims};
use crate::config::AuthIssuerConfig;
use crate::error::AuthRepoError;

/// Length of a per-identity HMAC secret.
const IDENTITY_SECRET_LEN: usize = 32;

/// Longest window honoured; larger configured values are clamped.
const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 60 * 60;

fn window(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

fn after(t: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    t.checked_add_signed(window(secs))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub struct AuthRepository {
    config: AuthIssuerConfig,
    keys: Arc<dyn SecureKeyProvider>,
    clock: Arc<dyn Clock>,
    snapshot_path: Option<PathBuf>,
    tables: Mutex<Tables>,
}

impl AuthRepository {
    pub fn new(
        config: AuthIssuerConfig,
        keys: Arc<dyn SecureKeyProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            keys,
            clock,
            snapshot_path: None,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Non-persistent repository with an in-memory key provider and the
    /// system clock.
    pub fn in_memory(config: AuthIssuerConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryKeyProvider::new()),
            Arc::new(SystemClock),
        )
    }

    /// Repository persisted to a JSON snapshot at `path`, loading it if it
    /// exists. The snapshot holds only wrapped secrets; `keys` must be the
    /// provider they were wrapped with.
    pub fn open(
        path: impl AsRef<Path>,
        config: AuthIssuerConfig,
        keys: Arc<dyn SecureKeyProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthRepoError> {
        let path = path.as_ref().to_path_buf();
        let tables = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Tables>(&bytes)
                .map_err(|e| AuthRepoError::CorruptSnapshot(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), "opened authorization repository");

        Ok(Self {
            config,
            keys,
            clock,
            snapshot_path: Some(path),
            tables: Mutex::new(tables),
        })
    }

    pub fn config(&self) -> &AuthIssuerConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wrapping_key(&self) -> Result<WrappingKey, AuthRepoError> {
        Ok(self.keys.get_or_create(AUTH_TOKEN_SECRET_KEY_NAME)?)
    }

    /// Apply `change` to the live tables. With a snapshot file the change
    /// is staged on a copy, which replaces the live tables only once it has
    /// been saved; a failed change or save leaves them untouched.
    fn transact<R>(
        &self,
        tables: &mut Tables,
        change: impl FnOnce(&mut Tables) -> Result<R, AuthRepoError>,
    ) -> Result<R, AuthRepoError> {
        let Some(path) = &self.snapshot_path else {
            return change(tables);
        };
        let mut staged = tables.clone();
        let outcome = change(&mut staged)?;
        staged.save(path)?;
        *tables = staged;
        Ok(outcome)
    }

    /// Purge the identity's oldest authorizations beyond the limit, sparing
    /// `keep`, then sweep orphans.
    fn enforce_retention(&self, tables: &mut Tables, identity_id: i64, keep: i64) {
        let max = self.config.max_outstanding_tokens_per_identity.max(1) as usize;
        let purged = tables.purge(identity_id, max, keep);
        if !purged.is_empty() {
            let stats = tables.sweep();
            info!(identity_id, ?purged, ?stats, "purged oldest authorizations");
        }
    }

    /// Issue a new authorization. The identity is reused if this exact
    /// (name, uri, icon) triple authorized before.
    pub fn issue(
        &self,
        identity: &AppIdentity,
        chain: &str,
        accounts: Vec<NewAccount>,
        wallet_uri_base: Option<String>,
        scope: Vec<u8>,
    ) -> Result<AuthRecord, AuthRepoError> {
        identity.validate().map_err(AuthRepoError::InvalidIdentity)?;
        let key = self.wrapping_key()?;
        let now = self.clock.now();

        let mut tables = self.lock();
        let auth_id = self.transact(&mut tables, |tables| {
            let existing = tables
                .find_identity(
                    identity.name.as_deref(),
                    identity.uri.as_deref(),
                    identity.icon.as_deref(),
                )
                .map(|row| row.id);
            let identity_id = match existing {
                Some(id) => id,
                None => {
                    let mut secret = Zeroizing::new([0u8; IDENTITY_SECRET_LEN]);
                    OsRng.fill_bytes(&mut secret[..]);
                    let wrapped = key.wrap(&secret[..])?;
                    let id = tables.insert_identity(
                        identity.name.clone(),
                        identity.uri.clone(),
                        identity.icon.clone(),
                        wrapped,
                    );
                    info!(identity_id = id, name = ?identity.name, "created identity");
                    id
                }
            };

            let auth_id = tables.insert_authorization(
                identity_id,
                chain.to_string(),
                scope,
                wallet_uri_base,
                now,
                after(now, self.config.authorization_validity_secs),
                accounts,
            );
            info!(identity_id, auth_id, chain, "issued authorization");

            self.enforce_retention(tables, identity_id, auth_id);
            Ok(auth_id)
        })?;
        tables
            .snapshot(auth_id)
            .ok_or(AuthRepoError::UnknownAuthorization(auth_id))
    }

    /// Encode the bearer token for `record`.
    pub fn to_auth_token(&self, record: &AuthRecord) -> Result<String, AuthRepoError> {
        let key = self.wrapping_key()?;
        let wrapped = {
            let tables = self.lock();
            tables
                .identity(record.identity.id)
                .map(|row| row.wrapped_secret.clone())
        }
        .ok_or(AuthRepoError::UnknownAuthorization(record.id))?;

        let secret = key.unwrap_secret(&wrapped)?;
        let claims = TokenClaims {
            identity_id: record.identity.id,
            auth_record_id: record.id,
        };
        Ok(token::encode(claims, &secret)?)
    }

    /// Verify `token` and return the record it names.
    ///
    /// `Ok(None)` for every invalid token: undecodable, bad tag, unknown,
    /// revoked, future-dated or past the reauthorization window.
    pub fn from_auth_token(&self, token: &str) -> Result<Option<AuthRecord>, AuthRepoError> {
        let decoded = match token::decode(token) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("rejecting auth token: {e}");
                return Ok(None);
            }
        };
        let TokenClaims {
            identity_id,
            auth_record_id,
        } = decoded.claims;

        let key = self.wrapping_key()?;
        let now = self.clock.now();
        let mut tables = self.lock();

        let Some(identity) = tables.identity(identity_id) else {
            debug!(identity_id, "rejecting auth token: unknown identity");
            return Ok(None);
        };
        let secret = match key.unwrap_secret(&identity.wrapped_secret) {
            Ok(secret) => secret,
            Err(e) => {
                warn!(identity_id, "rejecting auth token: identity secret unavailable: {e}");
                return Ok(None);
            }
        };
        if !decoded.verify(&secret) {
            warn!(identity_id, auth_record_id, "rejecting auth token: bad HMAC tag");
            return Ok(None);
        }

        let Some((owner, issued, revoked)) = tables
            .authorization(auth_record_id)
            .map(|row| (row.identity_id, row.issued, row.revoked))
        else {
            debug!(auth_record_id, "rejecting auth token: record no longer exists");
            return Ok(None);
        };
        if owner != identity_id {
            warn!(auth_record_id, identity_id, "rejecting auth token: identity mismatch");
            return Ok(None);
        }
        if revoked {
            debug!(auth_record_id, "rejecting auth token: revoked");
            return Ok(None);
        }
        if issued > now {
            warn!(auth_record_id, %issued, "revoking future-dated authorization");
            self.transact(&mut tables, |t| Ok(t.revoke(auth_record_id)))?;
            return Ok(None);
        }
        if now.signed_duration_since(issued) > window(self.config.reauthorization_validity_secs) {
            info!(auth_record_id, %issued, "revoking authorization past reauthorization validity");
            self.transact(&mut tables, |t| Ok(t.revoke(auth_record_id)))?;
            return Ok(None);
        }

        Ok(tables.snapshot(auth_record_id))
    }

    /// Refresh `record`.
    ///
    /// Inside the no-op window the same record comes back. Past it but
    /// within reauthorization validity, a new record is issued and the old
    /// one revoked. Otherwise `None`, revoking the record if it was still
    /// live.
    pub fn reissue(&self, record: &AuthRecord) -> Result<Option<AuthRecord>, AuthRepoError> {
        let now = self.clock.now();
        let mut tables = self.lock();

        let Some(current) = tables.snapshot(record.id) else {
            debug!(auth_id = record.id, "cannot reissue: record no longer exists");
            return Ok(None);
        };
        if current.revoked {
            debug!(auth_id = current.id, "cannot reissue: revoked");
            return Ok(None);
        }
        if current.issued > now {
            warn!(auth_id = current.id, "revoking future-dated authorization");
            self.transact(&mut tables, |t| Ok(t.revoke(current.id)))?;
            return Ok(None);
        }

        let age = now.signed_duration_since(current.issued);
        if age < window(self.config.reauthorization_nop_secs) {
            debug!(auth_id = current.id, "reissue inside no-op window");
            return Ok(Some(current));
        }
        if age > window(self.config.reauthorization_validity_secs) {
            info!(auth_id = current.id, "revoking authorization past reauthorization validity");
            self.transact(&mut tables, |t| Ok(t.revoke(current.id)))?;
            return Ok(None);
        }

        let new_id = self.transact(&mut tables, |tables| {
            let accounts = current.accounts.iter().map(NewAccount::from).collect();
            let new_id = tables.insert_authorization(
                current.identity.id,
                current.chain.clone(),
                current.scope.clone(),
                current.wallet_uri_base.clone(),
                now,
                after(now, self.config.authorization_validity_secs),
                accounts,
            );
            tables.revoke(current.id);
            info!(old = current.id, new = new_id, "reissued authorization");

            self.enforce_retention(tables, current.identity.id, new_id);
            Ok(new_id)
        })?;
        Ok(tables.snapshot(new_id))
    }

    /// Mark one authorization revoked. Returns false if it was unknown or
    /// already revoked.
    pub fn revoke(&self, auth_record_id: i64) -> Result<bool, AuthRepoError> {
        let mut tables = self.lock();
        if !tables
            .authorization(auth_record_id)
            .is_some_and(|row| !row.revoked)
        {
            return Ok(false);
        }
        self.transact(&mut tables, |t| Ok(t.revoke(auth_record_id)))?;
        info!(auth_record_id, "revoked authorization");
        Ok(true)
    }

    /// Delete every authorization of an identity, then the identity itself.
    pub fn revoke_identity(&self, identity_id: i64) -> Result<bool, AuthRepoError> {
        let mut tables = self.lock();
        if tables.identity(identity_id).is_none() {
            return Ok(false);
        }
        let (deleted, stats) = self.transact(&mut tables, |t| {
            let deleted = t.delete_identity_authorizations(identity_id);
            Ok((deleted, t.sweep()))
        })?;
        info!(identity_id, deleted, ?stats, "revoked identity");
        Ok(true)
    }

    pub fn get(&self, auth_record_id: i64) -> Option<AuthRecord> {
        self.lock().snapshot(auth_record_id)
    }

    /// The record, if it is unrevoked and within authorization validity.
    pub fn get_active(&self, auth_record_id: i64) -> Option<AuthRecord> {
        let now = self.clock.now();
        self.get(auth_record_id).filter(|r| r.is_active(now))
    }

    pub fn list_identities(&self) -> Vec<IdentityRecord> {
        self.lock().identities()
    }

    pub fn list_authorizations(&self, identity_id: i64) -> Vec<AuthRecord> {
        let tables = self.lock();
        tables
            .authorization_ids_for(identity_id)
            .into_iter()
            .filter_map(|id| tables.snapshot(id))
            .collect()
    }
}

impl std::fmt::Debug for AuthRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRepository")
            .field("config", &self.config)
            .field("snapshot_path", &self.snapshot_path)
            .finish_non_exhaustive()
    }
}
