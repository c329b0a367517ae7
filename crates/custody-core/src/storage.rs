//! Durable key-value storage for the keyring.
//!
//! The keyring only needs `get`/`set`/`remove` on JSON values plus a change
//! feed. `MemoryStore` backs tests; `FileStore` keeps every key in one JSON
//! document replaced atomically on each write.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

pub const VAULTS_KEY: &str = "vaults";
pub const SELECTED_VAULT_KEY: &str = "selectedVaultId";
pub const KEY_PRINT_KEY: &str = "passwordKeyPrint";
pub const PENDING_KEY_PRINT_KEY: &str = "pendingPasswordKeyPrint";
pub const ENABLED_NETWORKS_KEY: &str = "enabledNetworks";
pub const ACTIVE_NETWORK_KEY: &str = "activeNetwork";
pub const NETWORK_WALLETS_KEY: &str = "networkWallets";
pub const ACTIVE_WALLET_INDEX_KEY: &str = "activeWalletIndex";

const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value is not valid JSON: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("atomic replace failed: {0}")]
    Persist(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One key changed. `new_value` is `None` for removals.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub new_value: Option<Value>,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

pub async fn load<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn save<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    store.set(key, serde_json::to_value(value)?).await
}

// ── In-memory ───────────────────────────────────────────────────────────────

pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    /// Copy of every entry, for before/after comparisons.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.read().clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_string(), value.clone());
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            new_value: Some(value),
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        if self.entries.write().remove(key).is_some() {
            let _ = self.changes.send(StorageChange {
                key: key.to_string(),
                new_value: None,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

// ── JSON file ───────────────────────────────────────────────────────────────

pub struct FileStore {
    path: PathBuf,
    cache: RwLock<BTreeMap<String, Value>>,
    // Held across the blocking write so documents reach disk in order.
    writes: Mutex<()>,
    changes: broadcast::Sender<StorageChange>,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
            restrict_dir_permissions(parent);
        }
        let cache = Self::read_file(&path)?;
        debug!(path = %path.display(), keys = cache.len(), "file store opened");
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            path,
            cache: RwLock::new(cache),
            writes: Mutex::new(()),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file and announces every key another process changed.
    pub fn reload(&self) -> Result<Vec<StorageChange>, StorageError> {
        let on_disk = Self::read_file(&self.path)?;
        let mut cache = self.cache.write();
        let mut changed = Vec::new();
        for (key, value) in &on_disk {
            if cache.get(key) != Some(value) {
                changed.push(StorageChange {
                    key: key.clone(),
                    new_value: Some(value.clone()),
                });
            }
        }
        for key in cache.keys() {
            if !on_disk.contains_key(key) {
                changed.push(StorageChange {
                    key: key.clone(),
                    new_value: None,
                });
            }
        }
        *cache = on_disk;
        drop(cache);
        for change in &changed {
            let _ = self.changes.send(change.clone());
        }
        Ok(changed)
    }

    fn read_file(path: &Path) -> Result<BTreeMap<String, Value>, StorageError> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read(path)?;
        if data.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_slice(&data)?)
    }

    /// Writes the whole document to a sibling temp file, then renames it over
    /// the original.
    fn persist(path: &Path, entries: &BTreeMap<String, Value>) -> Result<(), StorageError> {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(entries)?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| StorageError::Persist(e.to_string()))?;
        Ok(())
    }

    async fn apply(&self, key: &str, value: Option<Value>) -> Result<(), StorageError> {
        let _guard = self.writes.lock().await;
        let mut next = self.cache.read().clone();
        match &value {
            Some(v) => {
                next.insert(key.to_string(), v.clone());
            }
            None => {
                if next.remove(key).is_none() {
                    return Ok(());
                }
            }
        }
        let path = self.path.clone();
        let next = tokio::task::spawn_blocking(move || {
            Self::persist(&path, &next)?;
            Ok::<_, StorageError>(next)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("persist task failed: {e}")))??;
        *self.cache.write() = next;
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            new_value: value,
        });
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.cache.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.apply(key, Some(value)).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.apply(key, None).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn memory_store_round_trip_and_feed() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe();
        save(&store, SELECTED_VAULT_KEY, &"v1").await.unwrap();
        let got: Option<String> = load(&store, SELECTED_VAULT_KEY).await.unwrap();
        assert_eq!(got.as_deref(), Some("v1"));
        let change = feed.recv().await.unwrap();
        assert_eq!(change.key, SELECTED_VAULT_KEY);

        store.remove(SELECTED_VAULT_KEY).await.unwrap();
        assert_eq!(feed.recv().await.unwrap().new_value, None);
        assert!(store.get(SELECTED_VAULT_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custody.json");
        {
            let store = FileStore::open(&path).unwrap();
            store.set("a", json!({"x": 1})).await.unwrap();
            store.set("b", json!([1, 2])).await.unwrap();
            store.remove("b").await.unwrap();
        }
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!({"x": 1})));
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn file_store_concurrent_writers_all_land() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custody.json");
        let store = std::sync::Arc::new(FileStore::open(&path).unwrap());

        let writers: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.set(&format!("k{i}"), json!(i)).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        for i in 0..16 {
            assert_eq!(reopened.get(&format!("k{i}")).await.unwrap(), Some(json!(i)));
        }
    }

    #[tokio::test]
    async fn file_store_reload_reports_external_edits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custody.json");
        let store = FileStore::open(&path).unwrap();
        store.set("kept", json!(1)).await.unwrap();
        store.set("dropped", json!(2)).await.unwrap();

        let other = FileStore::open(&path).unwrap();
        other.set("kept", json!(10)).await.unwrap();
        other.remove("dropped").await.unwrap();

        let mut feed = store.subscribe();
        let changes = store.reload().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(store.get("kept").await.unwrap(), Some(json!(10)));
        assert!(feed.recv().await.is_ok());
    }
}
