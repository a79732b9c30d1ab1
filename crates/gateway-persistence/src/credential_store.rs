//! Durable mapping of user identity to API key pair.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::atomic::{atomic_write_json, atomic_write_private, ensure_dir, read_json_optional, remove_file_if_exists};
use crate::error::Result;

/// File name of the credential store under the data directory.
const STORE_FILE: &str = "users.json";

/// Directory holding the per-user credential blobs.
const SESSIONS_SUBDIR: &str = "sessions";

/// Extension a credential blob must carry when uploaded.
pub const CREDENTIAL_FILE_EXTENSION: &str = ".session";

/// API id and hash a user registered with Telegram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyPair {
    pub api_id: i32,
    pub api_hash: String,
}

impl ApiKeyPair {
    pub fn new(api_id: i32, api_hash: impl Into<String>) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
        }
    }
}

/// Credential records plus the blob files that go with them.
///
/// ```text
/// base_path/
/// ├── users.json            # { "<user id>": { "api_id": .., "api_hash": .. } }
/// └── sessions/
///     └── user_<id>.session # opaque blob uploaded during onboarding
/// ```
///
/// The store file is rewritten wholesale on every save. The blobs are written
/// and removed individually.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    base_path: PathBuf,
}

impl CredentialStore {
    /// Creates a store rooted at `base_path`. Nothing is touched on disk yet.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Path of the `users.json` mapping.
    pub fn store_path(&self) -> PathBuf {
        self.base_path.join(STORE_FILE)
    }

    /// Directory holding the credential blobs.
    pub fn sessions_dir(&self) -> PathBuf {
        self.base_path.join(SESSIONS_SUBDIR)
    }

    /// Deterministic blob path for a user.
    pub fn credential_path(&self, user_id: i64) -> PathBuf {
        self.sessions_dir()
            .join(format!("user_{}{}", user_id, CREDENTIAL_FILE_EXTENSION))
    }

    /// Loads every stored record.
    ///
    /// A missing file is an empty store. A file that exists but cannot be
    /// parsed is an error: treating it as empty would orphan every blob.
    pub fn load(&self) -> Result<BTreeMap<i64, ApiKeyPair>> {
        let path = self.store_path();
        let records: BTreeMap<i64, ApiKeyPair> = read_json_optional(&path)?.unwrap_or_default();
        info!(count = records.len(), path = %path.display(), "Loaded credential records");
        Ok(records)
    }

    /// Atomically replaces the stored mapping with `records`.
    pub fn save<'a, I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = (i64, &'a ApiKeyPair)>,
    {
        let map: BTreeMap<i64, &ApiKeyPair> = records.into_iter().collect();
        let path = self.store_path();
        atomic_write_json(&path, &map)?;
        debug!(count = map.len(), path = %path.display(), "Saved credential records");
        Ok(())
    }

    /// Writes a user's credential blob, replacing any previous one.
    pub fn write_credential(&self, user_id: i64, data: &[u8]) -> Result<PathBuf> {
        let path = self.credential_path(user_id);
        atomic_write_private(&path, data)?;
        Ok(path)
    }

    /// Creates the sessions directory if it is missing.
    pub fn ensure_sessions_dir(&self) -> Result<()> {
        ensure_dir(&self.sessions_dir())
    }

    /// Removes a user's blob. A missing blob is not an error.
    pub fn remove_credential(&self, user_id: i64) -> Result<bool> {
        let path = self.credential_path(user_id);
        let removed = remove_file_if_exists(&path)?;
        debug!(user_id, removed, path = %path.display(), "Removed credential blob");
        Ok(removed)
    }

    /// Base directory of this store.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PersistenceError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path());

        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_corrupt_file_fails() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        fs::write(store.store_path(), "[1, 2").unwrap();

        assert!(matches!(store.load(), Err(PersistenceError::Corrupt { .. })));
    }

    #[test]
    fn test_load_rejects_non_numeric_identity() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        fs::write(
            store.store_path(),
            r#"{"alice": {"api_id": 1, "api_hash": "h"}}"#,
        )
        .unwrap();

        assert!(store.load().is_err());
    }

    #[test]
    fn test_save_then_load_reproduces_records() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path());

        store.save(std::iter::empty()).unwrap();
        assert!(store.load().unwrap().is_empty());

        let a = ApiKeyPair::new(111, "hash-a");
        let b = ApiKeyPair::new(222, "hash-b");
        let c = ApiKeyPair::new(333, "hash-c");
        store.save([(3, &c), (1, &a), (2, &b)]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[&1], a);
        assert_eq!(loaded[&2], b);
        assert_eq!(loaded[&3], c);
    }

    #[test]
    fn test_save_uses_reference_layout() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let keys = ApiKeyPair::new(12345, "abcdef");

        store.save([(42, &keys)]).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.store_path()).unwrap()).unwrap();
        assert_eq!(raw["42"]["api_id"], 12345);
        assert_eq!(raw["42"]["api_hash"], "abcdef");
    }

    #[test]
    fn test_save_drops_removed_entries() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let a = ApiKeyPair::new(1, "a");
        let b = ApiKeyPair::new(2, "b");

        store.save([(1, &a), (2, &b)]).unwrap();
        store.save([(2, &b)]).unwrap();

        let loaded = store.load().unwrap();
        assert!(!loaded.contains_key(&1));
        assert!(loaded.contains_key(&2));
    }

    #[test]
    fn test_credential_blob_lifecycle() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path());

        let path = store.write_credential(7, b"blob").unwrap();
        assert_eq!(path, dir.path().join("sessions").join("user_7.session"));
        assert_eq!(fs::read(&path).unwrap(), b"blob");

        assert!(store.remove_credential(7).unwrap());
        assert!(!store.remove_credential(7).unwrap());
    }
}
