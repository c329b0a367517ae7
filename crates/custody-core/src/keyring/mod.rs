//! Vault store and lifecycle manager.
//!
//! States: `NotLoaded -> {Empty | Locked | Unlocked}`. Every mutation runs
//! load, modify, persist under one async mutex so concurrent callers cannot
//! lose a vault. The session key is shared with the host through
//! `SessionKey`, so a keyring rebuilt after a reload picks up a live session.

mod password;
mod vaults;
mod wallets;

pub use wallets::NetworkWallet;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::crypto::KdfParams;
use crate::error::CustodyError;
use crate::key::{Key, KeyPrint};
use crate::network::Network;
use crate::session::SessionKey;
use crate::settings::CustodySettings;
use crate::storage::{self, KeyValueStore, StorageChange, KEY_PRINT_KEY, VAULTS_KEY};
use crate::vault::Vault;

/// Password of the air-gap-only epoch. Nothing secret is sealed under it:
/// air-gap vaults hold only the device's public export.
pub const DEFAULT_PASSWORD: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyringState {
    NotLoaded,
    Empty,
    Locked,
    Unlocked,
}

pub struct Keyring {
    store: Arc<dyn KeyValueStore>,
    session: SessionKey,
    kdf: KdfParams,
    default_networks: Vec<Network>,
    state: RwLock<KeyringState>,
    writes: Mutex<()>,
}

impl Keyring {
    pub fn new(store: Arc<dyn KeyValueStore>, session: SessionKey, settings: &CustodySettings) -> Self {
        Self {
            store,
            session,
            kdf: settings.kdf,
            default_networks: settings.default_networks.clone(),
            state: RwLock::new(KeyringState::NotLoaded),
            writes: Mutex::new(()),
        }
    }

    /// Loads the key print and vaults and settles the initial state.
    pub async fn init(&self) -> Result<KeyringState, CustodyError> {
        let _guard = self.writes.lock().await;
        self.init_locked().await
    }

    /// Re-runs state detection, e.g. after the store reported an external edit.
    pub async fn reload(&self) -> Result<KeyringState, CustodyError> {
        self.init().await
    }

    async fn init_locked(&self) -> Result<KeyringState, CustodyError> {
        self.settle_pending_print().await?;
        let print = self.load_key_print().await?;
        let vaults = self.load_vaults().await?;

        let state = match print {
            None => {
                if !vaults.is_empty() {
                    warn!(vaults = vaults.len(), "vaults present without a key print");
                }
                KeyringState::Empty
            }
            Some(print) if is_default_epoch(&vaults) => {
                if !self.session.is_unlocked() {
                    match Key::recreate_blocking(DEFAULT_PASSWORD.to_string(), print).await? {
                        Some(key) => self.session.install(key),
                        None => warn!("air-gap-only vaults do not open with the default password"),
                    }
                }
                if self.session.is_unlocked() {
                    warn!("wallet has no password protection until a password is set");
                    KeyringState::Unlocked
                } else {
                    KeyringState::Locked
                }
            }
            Some(_) if self.session.is_unlocked() => KeyringState::Unlocked,
            Some(_) => KeyringState::Locked,
        };

        *self.state.write() = state;
        info!(state = ?state, vaults = vaults.len(), "keyring initialised");
        Ok(state)
    }

    pub fn state(&self) -> KeyringState {
        *self.state.read()
    }

    pub fn session(&self) -> &SessionKey {
        &self.session
    }

    /// False while the store has no password or only the default one.
    pub async fn is_password_protected(&self) -> Result<bool, CustodyError> {
        if self.load_key_print().await?.is_none() {
            return Ok(false);
        }
        Ok(!is_default_epoch(&self.load_vaults().await?))
    }

    /// Change feed of the underlying store.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StorageChange> {
        self.store.subscribe()
    }

    fn set_state(&self, state: KeyringState) {
        let mut current = self.state.write();
        if *current != state {
            info!(from = ?*current, to = ?state, "keyring state changed");
            *current = state;
        }
    }

    pub(crate) async fn load_key_print(&self) -> Result<Option<KeyPrint>, CustodyError> {
        Ok(storage::load(self.store.as_ref(), KEY_PRINT_KEY).await?)
    }

    pub(crate) async fn load_vaults(&self) -> Result<Vec<Vault>, CustodyError> {
        let vaults: Option<Vec<Vault>> = storage::load(self.store.as_ref(), VAULTS_KEY)
            .await
            .map_err(|e| match e {
                storage::StorageError::Serialisation(e) => CustodyError::CorruptRecord(e.to_string()),
                other => CustodyError::Storage(other),
            })?;
        Ok(vaults.unwrap_or_default())
    }

    pub(crate) async fn save_vaults(&self, vaults: &[Vault]) -> Result<(), CustodyError> {
        storage::save(self.store.as_ref(), VAULTS_KEY, &vaults).await?;
        Ok(())
    }
}

/// Every vault is air-gap-only, so the store is sealed under `DEFAULT_PASSWORD`.
fn is_default_epoch(vaults: &[Vault]) -> bool {
    !vaults.is_empty() && vaults.iter().all(Vault::is_airgap_only)
}
