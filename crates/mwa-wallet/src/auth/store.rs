//! Arena tables behind the repository.
//!
//! Four tables keyed by integer id, linked by id references only:
//!
//! ```text
//! identities <- authorizations -> wallet_uri_bases
//!                     ^
//!                  accounts
//! ```
//!
//! Nothing cascades. Deleting authorizations leaves orphans behind until
//! [`Tables::sweep`] removes every account, wallet URI base and identity
//! that no authorization references.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::keys::write_private;
use super::records::{AccountRecord, AuthRecord, IdentityRecord, NewAccount};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IdentityRow {
    pub id: i64,
    pub name: Option<String>,
    pub uri: Option<String>,
    pub icon: Option<String>,
    /// HMAC secret wrapped by the key provider.
    pub wrapped_secret: Vec<u8>,
}

impl IdentityRow {
    fn record(&self) -> IdentityRecord {
        IdentityRecord {
            id: self.id,
            name: self.name.clone(),
            uri: self.uri.clone(),
            icon: self.icon.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AuthRow {
    pub id: i64,
    pub identity_id: i64,
    pub chain: String,
    pub scope: Vec<u8>,
    pub wallet_uri_base_id: Option<i64>,
    pub issued: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub revoked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AccountRow {
    pub id: i64,
    pub auth_id: i64,
    pub public_key: Vec<u8>,
    pub display_address: Option<String>,
    pub display_address_format: Option<String>,
    pub label: Option<String>,
    pub icon: Option<String>,
    pub chains: Option<Vec<String>>,
    pub features: Option<Vec<String>>,
}

/// Rows removed by a sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub accounts: usize,
    pub wallet_uri_bases: usize,
    pub identities: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Tables {
    next_id: i64,
    identities: BTreeMap<i64, IdentityRow>,
    authorizations: BTreeMap<i64, AuthRow>,
    accounts: BTreeMap<i64, AccountRow>,
    wallet_uri_bases: BTreeMap<i64, String>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            next_id: 1,
            identities: BTreeMap::new(),
            authorizations: BTreeMap::new(),
            accounts: BTreeMap::new(),
            wallet_uri_bases: BTreeMap::new(),
        }
    }
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn identity(&self, id: i64) -> Option<&IdentityRow> {
        self.identities.get(&id)
    }

    pub fn find_identity(
        &self,
        name: Option<&str>,
        uri: Option<&str>,
        icon: Option<&str>,
    ) -> Option<&IdentityRow> {
        self.identities.values().find(|row| {
            row.name.as_deref() == name && row.uri.as_deref() == uri && row.icon.as_deref() == icon
        })
    }

    pub fn insert_identity(
        &mut self,
        name: Option<String>,
        uri: Option<String>,
        icon: Option<String>,
        wrapped_secret: Vec<u8>,
    ) -> i64 {
        let id = self.allocate_id();
        self.identities.insert(
            id,
            IdentityRow {
                id,
                name,
                uri,
                icon,
                wrapped_secret,
            },
        );
        id
    }

    fn wallet_uri_base_id(&mut self, base: Option<String>) -> Option<i64> {
        let base = base?;
        if let Some((&id, _)) = self.wallet_uri_bases.iter().find(|(_, b)| **b == base) {
            return Some(id);
        }
        let id = self.allocate_id();
        self.wallet_uri_bases.insert(id, base);
        Some(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_authorization(
        &mut self,
        identity_id: i64,
        chain: String,
        scope: Vec<u8>,
        wallet_uri_base: Option<String>,
        issued: DateTime<Utc>,
        expires: DateTime<Utc>,
        accounts: Vec<NewAccount>,
    ) -> i64 {
        let wallet_uri_base_id = self.wallet_uri_base_id(wallet_uri_base);
        let auth_id = self.allocate_id();
        self.authorizations.insert(
            auth_id,
            AuthRow {
                id: auth_id,
                identity_id,
                chain,
                scope,
                wallet_uri_base_id,
                issued,
                expires,
                revoked: false,
            },
        );

        for account in accounts {
            let id = self.allocate_id();
            self.accounts.insert(
                id,
                AccountRow {
                    id,
                    auth_id,
                    public_key: account.public_key,
                    display_address: account.display_address,
                    display_address_format: account.display_address_format,
                    label: account.label,
                    icon: account.icon,
                    chains: account.chains,
                    features: account.features,
                },
            );
        }
        auth_id
    }

    pub fn authorization(&self, id: i64) -> Option<&AuthRow> {
        self.authorizations.get(&id)
    }

    /// Set the revoked flag. Returns false if the record is unknown or was
    /// already revoked.
    pub fn revoke(&mut self, id: i64) -> bool {
        match self.authorizations.get_mut(&id) {
            Some(row) if !row.revoked => {
                row.revoked = true;
                true
            }
            _ => false,
        }
    }

    /// Delete every authorization of `identity_id`.
    pub fn delete_identity_authorizations(&mut self, identity_id: i64) -> usize {
        let before = self.authorizations.len();
        self.authorizations
            .retain(|_, row| row.identity_id != identity_id);
        before - self.authorizations.len()
    }

    /// Delete the oldest authorizations of `identity_id` until at most
    /// `max` remain. Revoked records count. `keep` is never deleted, even if
    /// the clock stepped back and it sorts first. Returns the deleted ids.
    pub fn purge(&mut self, identity_id: i64, max: usize, keep: i64) -> Vec<i64> {
        let mut owned: Vec<(DateTime<Utc>, i64)> = self
            .authorizations
            .values()
            .filter(|row| row.identity_id == identity_id)
            .map(|row| (row.issued, row.id))
            .collect();
        if owned.len() <= max {
            return Vec::new();
        }

        owned.sort();
        let excess = owned.len() - max;
        let deleted: Vec<i64> = owned
            .into_iter()
            .map(|(_, id)| id)
            .filter(|id| *id != keep)
            .take(excess)
            .collect();
        for id in &deleted {
            self.authorizations.remove(id);
        }
        deleted
    }

    /// Remove rows no authorization references.
    pub fn sweep(&mut self) -> SweepStats {
        let live_auths: BTreeSet<i64> = self.authorizations.keys().copied().collect();
        let live_bases: BTreeSet<i64> = self
            .authorizations
            .values()
            .filter_map(|row| row.wallet_uri_base_id)
            .collect();
        let live_identities: BTreeSet<i64> = self
            .authorizations
            .values()
            .map(|row| row.identity_id)
            .collect();

        let mut stats = SweepStats::default();

        let before = self.accounts.len();
        self.accounts
            .retain(|_, row| live_auths.contains(&row.auth_id));
        stats.accounts = before - self.accounts.len();

        let before = self.wallet_uri_bases.len();
        self.wallet_uri_bases
            .retain(|id, _| live_bases.contains(id));
        stats.wallet_uri_bases = before - self.wallet_uri_bases.len();

        let before = self.identities.len();
        self.identities
            .retain(|id, _| live_identities.contains(id));
        stats.identities = before - self.identities.len();

        stats
    }

    /// Assemble the snapshot for one authorization.
    pub fn snapshot(&self, id: i64) -> Option<AuthRecord> {
        let row = self.authorizations.get(&id)?;
        let identity = self.identities.get(&row.identity_id)?.record();
        let wallet_uri_base = row
            .wallet_uri_base_id
            .and_then(|base| self.wallet_uri_bases.get(&base).cloned());
        let accounts = self
            .accounts
            .values()
            .filter(|a| a.auth_id == id)
            .map(|a| AccountRecord {
                id: a.id,
                parent_id: a.auth_id,
                public_key: a.public_key.clone(),
                display_address: a.display_address.clone(),
                display_address_format: a.display_address_format.clone(),
                label: a.label.clone(),
                icon: a.icon.clone(),
                chains: a.chains.clone(),
                features: a.features.clone(),
            })
            .collect();

        Some(AuthRecord {
            id: row.id,
            identity,
            chain: row.chain.clone(),
            scope: row.scope.clone(),
            wallet_uri_base,
            issued: row.issued,
            expires: row.expires,
            revoked: row.revoked,
            accounts,
        })
    }

    pub fn identities(&self) -> Vec<IdentityRecord> {
        self.identities.values().map(IdentityRow::record).collect()
    }

    pub fn authorization_ids_for(&self, identity_id: i64) -> Vec<i64> {
        self.authorizations
            .values()
            .filter(|row| row.identity_id == identity_id)
            .map(|row| row.id)
            .collect()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn wallet_uri_base_count(&self) -> usize {
        self.wallet_uri_bases.len()
    }

    /// Write the tables as JSON: temp file, then rename over `path`.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("tmp");
        write_private(&tmp, &json)?;
        std::fs::rename(&tmp, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn seed(tables: &mut Tables, identity: i64, issued: DateTime<Utc>, base: Option<&str>) -> i64 {
        tables.insert_authorization(
            identity,
            "solana:devnet".into(),
            Vec::new(),
            base.map(str::to_string),
            issued,
            issued + Duration::hours(1),
            vec![NewAccount::new(vec![1, 2, 3])],
        )
    }

    #[test]
    fn test_purge_oldest_then_sweep() {
        let mut tables = Tables::default();
        let identity = tables.insert_identity(Some("app".into()), None, None, vec![0]);
        let t0 = Utc::now();

        let a = seed(&mut tables, identity, t0, Some("https://w.example"));
        let b = seed(&mut tables, identity, t0 + Duration::seconds(1), None);
        let c = seed(&mut tables, identity, t0 + Duration::seconds(2), None);
        assert!(tables.revoke(c));

        assert_eq!(tables.purge(identity, 2, c), vec![a]);
        assert_eq!(tables.account_count(), 3);

        let stats = tables.sweep();
        assert_eq!(
            stats,
            SweepStats {
                accounts: 1,
                wallet_uri_bases: 1,
                identities: 0
            }
        );
        assert!(tables.snapshot(b).is_some());
        assert!(tables.identity(identity).is_some());

        assert_eq!(tables.delete_identity_authorizations(identity), 2);
        assert_eq!(tables.sweep().identities, 1);
        assert!(tables.identities().is_empty());
    }

    #[test]
    fn test_purge_breaks_ties_by_id() {
        let mut tables = Tables::default();
        let identity = tables.insert_identity(None, None, None, vec![0]);
        let t0 = Utc::now();
        let first = seed(&mut tables, identity, t0, None);
        let second = seed(&mut tables, identity, t0, None);

        assert_eq!(tables.purge(identity, 1, second), vec![first]);
        assert!(tables.authorization(second).is_some());
    }

    #[test]
    fn test_purge_spares_kept_record_issued_earlier() {
        let mut tables = Tables::default();
        let identity = tables.insert_identity(None, None, None, vec![0]);
        let t0 = Utc::now();
        let older = seed(&mut tables, identity, t0, None);
        let newest = seed(&mut tables, identity, t0 - Duration::seconds(60), None);

        assert_eq!(tables.purge(identity, 1, newest), vec![older]);
        assert!(tables.authorization(newest).is_some());
    }

    #[test]
    fn test_wallet_uri_bases_are_shared() {
        let mut tables = Tables::default();
        let identity = tables.insert_identity(None, None, None, vec![0]);
        let t0 = Utc::now();
        let a = seed(&mut tables, identity, t0, Some("https://w.example"));
        let b = seed(&mut tables, identity, t0, Some("https://w.example"));
        assert_eq!(tables.wallet_uri_base_count(), 1);

        tables.purge(identity, 1, b);
        tables.sweep();
        assert_eq!(tables.wallet_uri_base_count(), 1);
        assert!(tables.snapshot(a).is_none());
        assert_eq!(
            tables.snapshot(b).unwrap().wallet_uri_base.as_deref(),
            Some("https://w.example")
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");

        let mut tables = Tables::default();
        let identity = tables.insert_identity(Some("app".into()), None, None, vec![7; 4]);
        let id = seed(&mut tables, identity, Utc::now(), None);
        tables.save(&path).unwrap();

        let loaded: Tables = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(loaded.snapshot(id), tables.snapshot(id));
        assert_eq!(loaded.identity(identity).unwrap().wrapped_secret, vec![7; 4]);
        assert!(!path.with_extension("tmp").exists());
    }
}
