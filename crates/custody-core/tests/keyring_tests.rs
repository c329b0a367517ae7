//! Integration tests for the vault store and lifecycle manager.
//!
//! Tests cover:
//!  1. Fresh setup: no key, then password, then first mnemonic vault
//!  2. Default-password migration of an air-gap-only store
//!  3. Migration aborts untouched when one vault does not decrypt
//!  4. Migration rolls back when the key print cannot be written
//!  5. Last-vault invariant
//!  6. File-backed store survives a restart
//!  7. Unlock racing a password change never installs a stale key
//!  8. A change interrupted after the vault write completes on restart
//!  9. A change interrupted before the vault write is discarded on restart

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::tempdir;
use tokio::sync::broadcast;

use custody_core::crypto::KdfParams;
use custody_core::key::Key;
use custody_core::qr::{penumbra, zcash};
use custody_core::sealed_box::SealedBox;
use custody_core::storage::{
    KeyValueStore, StorageChange, StorageError, KEY_PRINT_KEY, PENDING_KEY_PRINT_KEY, VAULTS_KEY,
};
use custody_core::{
    AirgapImport, CustodyError, CustodySettings, FileStore, Keyring, KeyringState, MemoryStore,
    SessionKey, VaultKind,
};

fn settings() -> CustodySettings {
    CustodySettings {
        kdf: KdfParams::fast(),
        ..CustodySettings::default()
    }
}

fn keyring_on(store: Arc<dyn KeyValueStore>) -> Keyring {
    Keyring::new(store, SessionKey::new(), &settings())
}

fn zcash_import(fill: u8) -> AirgapImport {
    let code = zcash::FvkExport {
        mainnet: true,
        account_index: 0,
        label: format!("device {fill}"),
        orchard_fvk: Some([fill; zcash::ORCHARD_FVK_LEN]),
        transparent_xpub: None,
        address: None,
    }
    .encode()
    .unwrap();
    AirgapImport::from_codes(None, vec![code]).unwrap()
}

/// Memory store whose key-print writes can be made to fail. With
/// `crash_after` set, every write after the named key lands fails, as if the
/// process had died there.
struct FlakyStore {
    inner: MemoryStore,
    fail_key_print: Mutex<bool>,
    crash_after: Mutex<Option<&'static str>>,
    crashed: Mutex<bool>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_key_print: Mutex::new(false),
            crash_after: Mutex::new(None),
            crashed: Mutex::new(false),
        }
    }

    fn restart(&self) {
        *self.crash_after.lock() = None;
        *self.crashed.lock() = false;
    }

    fn snapshot(&self) -> BTreeMap<String, Value> {
        self.inner.snapshot()
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        if *self.crashed.lock() {
            return Err(StorageError::Backend("process gone".into()));
        }
        if key == KEY_PRINT_KEY && *self.fail_key_print.lock() {
            return Err(StorageError::Backend("disk full".into()));
        }
        self.inner.set(key, value).await?;
        if *self.crash_after.lock() == Some(key) {
            *self.crashed.lock() = true;
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        if *self.crashed.lock() {
            return Err(StorageError::Backend("process gone".into()));
        }
        self.inner.remove(key).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.subscribe()
    }
}

// ─── Test 1: Fresh setup ────────────────────────────────────────────────────

#[tokio::test]
async fn test_fresh_setup() {
    let kr = keyring_on(Arc::new(MemoryStore::new()));
    assert_eq!(kr.init().await.unwrap(), KeyringState::Empty);

    let phrase = "abandon ability able about above absent absorb abstract absurd abuse access zoo";
    assert!(matches!(
        kr.new_mnemonic_vault(phrase, "Wallet 1").await,
        Err(CustodyError::Locked)
    ));

    kr.set_password("correct horse").await.unwrap();
    let id = kr.new_mnemonic_vault(phrase, "Wallet 1").await.unwrap();

    let infos = kr.key_infos().await.unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].id, id);
    assert_eq!(infos[0].kind, VaultKind::Mnemonic);
    assert!(infos[0].is_selected);
    assert!(kr.is_password_protected().await.unwrap());

    let enabled = kr.enabled_networks().await.unwrap();
    assert_eq!(enabled, CustodySettings::default().default_networks);
}

// ─── Test 2: Migration ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_default_password_migration() {
    let store = Arc::new(MemoryStore::new());
    let kr = keyring_on(store.clone());
    kr.init().await.unwrap();

    let id = kr
        .add_airgap_vault_without_password(&zcash_import(1), "Signer")
        .await
        .unwrap();
    assert!(!kr.is_password_protected().await.unwrap());
    assert_eq!(kr.key_infos().await.unwrap()[0].insensitive["airgapOnly"], true);

    // A restarted process opens the default epoch without a prompt.
    let restarted = keyring_on(store.clone());
    assert_eq!(restarted.init().await.unwrap(), KeyringState::Unlocked);

    kr.set_password("newpass").await.unwrap();

    let info = kr.key_infos().await.unwrap().remove(0);
    assert_eq!(info.id, id);
    assert!(info.insensitive.get("airgapOnly").is_none());
    assert!(kr.is_password_protected().await.unwrap());

    kr.lock();
    assert!(matches!(kr.unlock("").await, Err(CustodyError::WrongPassword)));
    kr.unlock("newpass").await.unwrap();

    let fresh = keyring_on(store);
    assert_eq!(fresh.init().await.unwrap(), KeyringState::Locked);
}

// ─── Test 3: Migration aborts on an undecryptable vault ─────────────────────

#[tokio::test]
async fn test_migration_aborts_without_writes() {
    let store = Arc::new(MemoryStore::new());
    let kr = keyring_on(store.clone());
    kr.init().await.unwrap();
    kr.add_airgap_vault_without_password(&zcash_import(1), "")
        .await
        .unwrap();
    let second = kr
        .add_airgap_vault_without_password(&zcash_import(2), "")
        .await
        .unwrap();
    kr.add_airgap_vault_without_password(&zcash_import(3), "")
        .await
        .unwrap();

    // Re-seal the second vault under an unrelated key.
    let mut vaults = store.get(VAULTS_KEY).await.unwrap().unwrap();
    let (foreign, _) = Key::create("someone else", &KdfParams::fast()).unwrap();
    let bogus = SealedBox::seal(&foreign, b"{}").unwrap();
    vaults[1]["encryptedData"] = serde_json::to_value(&bogus).unwrap();
    store.set(VAULTS_KEY, vaults).await.unwrap();

    let before = store.snapshot();
    match kr.set_password("newpass").await {
        Err(CustodyError::MigrationAborted { vault_id }) => assert_eq!(vault_id, second),
        other => panic!("expected MigrationAborted, got {other:?}"),
    }
    assert_eq!(store.snapshot(), before);
    assert!(kr.check_password("").await.unwrap());
}

// ─── Test 4: Migration rolls back on key-print failure ──────────────────────

#[tokio::test]
async fn test_migration_rolls_back_when_key_print_write_fails() {
    let store = Arc::new(FlakyStore::new());
    let kr = keyring_on(store.clone());
    kr.init().await.unwrap();
    kr.add_airgap_vault_without_password(&zcash_import(1), "")
        .await
        .unwrap();

    let before = store.snapshot();
    *store.fail_key_print.lock() = true;
    assert!(matches!(
        kr.set_password("newpass").await,
        Err(CustodyError::Storage(_))
    ));
    assert_eq!(store.snapshot(), before);

    *store.fail_key_print.lock() = false;
    assert!(kr.check_password("").await.unwrap());
    kr.set_password("newpass").await.unwrap();
    assert!(kr.check_password("newpass").await.unwrap());
}

// ─── Test 5: Last-vault invariant ───────────────────────────────────────────

#[tokio::test]
async fn test_last_vault_cannot_be_deleted() {
    let kr = keyring_on(Arc::new(MemoryStore::new()));
    kr.init().await.unwrap();
    kr.set_password("pw").await.unwrap();

    let a = kr.new_mnemonic_vault("abandon", "A").await.unwrap();
    assert!(matches!(
        kr.delete_vault(&a).await,
        Err(CustodyError::LastVaultDeletionRefused)
    ));

    let b = kr.new_airgap_vault(&zcash_import(9), "B").await.unwrap();
    let c = kr.new_mnemonic_vault("ability", "C").await.unwrap();
    assert_eq!(kr.key_infos().await.unwrap().len(), 3);

    kr.delete_vault(&b).await.unwrap();
    assert_eq!(kr.key_infos().await.unwrap().len(), 2);
    assert!(kr.network_wallets(custody_core::Network::Zcash).await.unwrap().is_empty());

    kr.delete_vault(&c).await.unwrap();
    let infos = kr.key_infos().await.unwrap();
    assert_eq!(infos.len(), 1);
    assert!(infos[0].is_selected);
    assert!(matches!(
        kr.delete_vault(&a).await,
        Err(CustodyError::LastVaultDeletionRefused)
    ));
    assert!(matches!(
        kr.delete_vault("missing").await,
        Err(CustodyError::VaultNotFound(_))
    ));
}

// ─── Test 6: File-backed restart ────────────────────────────────────────────

#[tokio::test]
async fn test_file_store_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("custody.json");
    let id = {
        let kr = keyring_on(Arc::new(FileStore::open(&path).unwrap()));
        kr.init().await.unwrap();
        kr.set_password("pw").await.unwrap();
        let id = kr.new_mnemonic_vault("abandon ability", "Main").await.unwrap();
        let export = penumbra::FvkExport {
            mainnet: true,
            account_index: 0,
            label: String::new(),
            fvk: Some([3; penumbra::FVK_LEN]),
            address: None,
        }
        .encode()
        .unwrap();
        let import = AirgapImport::from_codes(Some("dev".into()), vec![export]).unwrap();
        kr.new_airgap_vault(&import, "Cold").await.unwrap();
        id
    };

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("abandon"));

    let kr = keyring_on(Arc::new(FileStore::open(&path).unwrap()));
    assert_eq!(kr.init().await.unwrap(), KeyringState::Locked);
    assert!(matches!(kr.get_mnemonic(&id).await, Err(CustodyError::Locked)));
    kr.unlock("pw").await.unwrap();
    assert_eq!(kr.get_mnemonic(&id).await.unwrap().as_str(), "abandon ability");
    assert_eq!(kr.selected_vault_id().await.unwrap().as_deref(), Some(id.as_str()));
    assert_eq!(kr.key_infos().await.unwrap().len(), 2);
}

// ─── Test 7: Unlock during a password change ────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unlock_racing_password_change() {
    let kr = Arc::new(keyring_on(Arc::new(MemoryStore::new())));
    kr.init().await.unwrap();
    kr.set_password("old").await.unwrap();
    let id = kr.new_mnemonic_vault("abandon ability", "Main").await.unwrap();
    kr.lock();

    let changer = {
        let kr = kr.clone();
        tokio::spawn(async move { kr.change_password("old", "new").await })
    };
    let unlocked = kr.unlock("old").await;
    changer.await.unwrap().unwrap();

    // Either the unlock ran first and the change replaced its key, or it ran
    // after and the old password was already gone.
    if let Err(err) = unlocked {
        assert!(matches!(err, CustodyError::WrongPassword));
    }
    assert_eq!(kr.get_mnemonic(&id).await.unwrap().as_str(), "abandon ability");
}

// ─── Test 8: Interrupted after the vault write ──────────────────────────────

#[tokio::test]
async fn test_interrupted_change_completes_on_restart() {
    let store = Arc::new(FlakyStore::new());
    let kr = keyring_on(store.clone());
    kr.init().await.unwrap();
    kr.set_password("old").await.unwrap();
    let id = kr.new_mnemonic_vault("abandon ability", "Main").await.unwrap();

    *store.crash_after.lock() = Some(VAULTS_KEY);
    assert!(kr.change_password("old", "new").await.is_err());
    // New vaults on disk, old key print still in place.
    assert!(store.snapshot().contains_key(PENDING_KEY_PRINT_KEY));
    drop(kr);

    store.restart();
    let kr = keyring_on(store.clone());
    assert_eq!(kr.init().await.unwrap(), KeyringState::Locked);
    assert!(!store.snapshot().contains_key(PENDING_KEY_PRINT_KEY));
    assert!(matches!(kr.unlock("old").await, Err(CustodyError::WrongPassword)));
    kr.unlock("new").await.unwrap();
    assert_eq!(kr.get_mnemonic(&id).await.unwrap().as_str(), "abandon ability");
}

// ─── Test 9: Interrupted before the vault write ─────────────────────────────

#[tokio::test]
async fn test_interrupted_change_is_discarded_on_restart() {
    let store = Arc::new(FlakyStore::new());
    let kr = keyring_on(store.clone());
    kr.init().await.unwrap();
    kr.set_password("old").await.unwrap();
    let id = kr.new_mnemonic_vault("abandon ability", "Main").await.unwrap();
    let print_before = store.snapshot()[KEY_PRINT_KEY].clone();

    *store.crash_after.lock() = Some(PENDING_KEY_PRINT_KEY);
    assert!(kr.change_password("old", "new").await.is_err());
    drop(kr);

    store.restart();
    let kr = keyring_on(store.clone());
    kr.init().await.unwrap();
    let after = store.snapshot();
    assert!(!after.contains_key(PENDING_KEY_PRINT_KEY));
    assert_eq!(after[KEY_PRINT_KEY], print_before);
    kr.unlock("old").await.unwrap();
    assert_eq!(kr.get_mnemonic(&id).await.unwrap().as_str(), "abandon ability");
}
