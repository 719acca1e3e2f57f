//! Default JSON-file credential store
//!
//! Keeps every known portal's record in a single JSON file mapping domain to
//! record. All writes use atomic temp-file + rename to prevent corruption on
//! crash. A tokio Mutex serializes concurrent writes from the install path
//! and request-time refresh.
//!
//! This store is illustrative: it is good enough for a single-process bot or
//! a development setup. Production deployments inject their own
//! [`CredentialStorage`] implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::record::{CredentialHint, CredentialRecord};
use crate::storage::{CredentialStorage, StorageFuture};

/// Thread-safe single-file credential store keyed by portal domain.
///
/// Reads acquire the lock briefly to clone the in-memory record, so call-time
/// reads don't block on concurrent persists.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, CredentialRecord>>,
}

impl FileStore {
    /// Load credentials from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}` (cold start with zero
    /// portals). Every call will fail with a no-install error until the
    /// install handler writes the first record.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let records: HashMap<String, CredentialRecord> = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), portals = records.len(), "loaded credentials");
            records
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let store = HashMap::new();
            // Create the empty file so future loads don't need the cold-start path
            write_atomic(&path, &store).await?;
            store
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Domains with a stored record.
    pub async fn domains(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.keys().cloned().collect()
    }

    /// Remove a portal's record and persist.
    ///
    /// Returns the removed record if it existed.
    pub async fn remove(&self, domain: &str) -> Result<Option<CredentialRecord>> {
        let mut state = self.state.lock().await;
        let removed = state.remove(domain);
        if removed.is_some() {
            debug!(domain, "removed credential record");
            write_atomic(&self.path, &state).await?;
        }
        Ok(removed)
    }
}

impl CredentialStorage for FileStore {
    fn read<'a>(
        &'a self,
        hint: &'a CredentialHint,
    ) -> StorageFuture<'a, Result<Option<CredentialRecord>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(&hint.domain).cloned())
        })
    }

    fn write<'a>(&'a self, record: &'a CredentialRecord) -> StorageFuture<'a, Result<()>> {
        Box::pin(async move {
            if record.domain.is_empty() {
                return Err(Error::InvalidRecord(
                    "cannot persist a record without a domain".into(),
                ));
            }
            let mut state = self.state.lock().await;
            state.insert(record.domain.clone(), record.clone());
            debug!(domain = %record.domain, "stored credential record");
            write_atomic(&self.path, &state).await
        })
    }
}

/// Write the record map to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. File permissions are set to 0600 (owner read/write only)
/// since the file contains OAuth tokens.
async fn write_atomic(path: &Path, data: &HashMap<String, CredentialRecord>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".b24-credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    // Set 0600 permissions (unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record(domain: &str) -> CredentialRecord {
        CredentialRecord {
            access_token: format!("at_{domain}"),
            refresh_token: format!("rt_{domain}"),
            domain: domain.into(),
            client_endpoint: format!("https://{domain}/rest/"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn roundtrip_write_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileStore::load(path.clone()).await.unwrap();
        store.write(&test_record("a.bitrix24.com")).await.unwrap();

        // Load into a new store instance
        let store2 = FileStore::load(path).await.unwrap();
        let hint = CredentialHint::for_domain("a.bitrix24.com");
        let record = store2.read(&hint).await.unwrap().unwrap();
        assert_eq!(record.access_token, "at_a.bitrix24.com");
        assert_eq!(record.client_endpoint, "https://a.bitrix24.com/rest/");
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        assert!(!path.exists());
        let store = FileStore::load(path.clone()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: HashMap<String, CredentialRecord> = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn read_unknown_domain_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();

        let hint = CredentialHint::for_domain("missing.bx");
        assert!(store.read(&hint).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_overwrites_same_domain() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();

        store.write(&test_record("a.bx")).await.unwrap();
        let mut updated = test_record("a.bx");
        updated.access_token = "at_new".into();
        store.write(&updated).await.unwrap();

        assert_eq!(store.len().await, 1);
        let hint = CredentialHint::for_domain("a.bx");
        let record = store.read(&hint).await.unwrap().unwrap();
        assert_eq!(record.access_token, "at_new");
    }

    #[tokio::test]
    async fn write_without_domain_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();

        let record = CredentialRecord {
            access_token: "at".into(),
            ..Default::default()
        };
        assert!(store.write(&record).await.is_err());
    }

    #[tokio::test]
    async fn remove_deletes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileStore::load(path.clone()).await.unwrap();

        store.write(&test_record("a.bx")).await.unwrap();
        store.write(&test_record("b.bx")).await.unwrap();

        let removed = store.remove("a.bx").await.unwrap();
        assert!(removed.is_some());
        let removed_again = store.remove("a.bx").await.unwrap();
        assert!(removed_again.is_none());

        let store2 = FileStore::load(path).await.unwrap();
        assert_eq!(store2.len().await, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileStore::load(path.clone()).await.unwrap();
        store.write(&test_record("a.bx")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = std::sync::Arc::new(FileStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.write(&test_record(&format!("p{i}.bx"))).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.len().await, 10);
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: HashMap<String, CredentialRecord> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 10);
    }
}
