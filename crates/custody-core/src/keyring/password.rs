//! Password epochs: setup, default-password migration, change, unlock.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::{is_default_epoch, Keyring, KeyringState, DEFAULT_PASSWORD};
use crate::error::CustodyError;
use crate::key::{Key, KeyPrint};
use crate::sealed_box::SealedBox;
use crate::storage::{self, StorageError, KEY_PRINT_KEY, PENDING_KEY_PRINT_KEY, VAULTS_KEY};
use crate::vault::Vault;

/// Key print of a password change in flight, tied to the vault record it seals.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingKeyPrint {
    print: KeyPrint,
    vaults_digest: String,
}

fn vaults_digest(record: &Value) -> Result<String, CustodyError> {
    let bytes = serde_json::to_vec(record).map_err(StorageError::from)?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

impl Keyring {
    /// First password, or the upgrade out of the default-password epoch.
    pub async fn set_password(&self, password: &str) -> Result<(), CustodyError> {
        if password.is_empty() {
            return Err(CustodyError::EmptyPassword);
        }
        let _guard = self.writes.lock().await;

        let Some(print) = self.load_key_print().await? else {
            let (key, print) = Key::create_blocking(password.to_string(), self.kdf).await?;
            storage::save(self.store.as_ref(), KEY_PRINT_KEY, &print).await?;
            self.session.install(key);
            self.set_state(KeyringState::Unlocked);
            info!("password set");
            return Ok(());
        };

        match Key::recreate_blocking(DEFAULT_PASSWORD.to_string(), print).await? {
            Some(old_key) => self.migrate(&old_key, password).await,
            None => Err(CustodyError::PasswordAlreadySet),
        }
    }

    /// Re-encrypts every vault under a key derived from `new_password`.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<(), CustodyError> {
        if new_password.is_empty() {
            return Err(CustodyError::EmptyPassword);
        }
        let _guard = self.writes.lock().await;
        let print = self
            .load_key_print()
            .await?
            .ok_or(CustodyError::PasswordRequired)?;
        let old_key = Key::recreate_blocking(old_password.to_string(), print)
            .await?
            .ok_or(CustodyError::WrongPassword)?;
        self.migrate(&old_key, new_password).await
    }

    /// Decrypt all, re-encrypt all, persist all, then swap the key print.
    /// The new print is staged first so `settle_pending_print` can finish or
    /// discard a change interrupted between the vault and key print writes.
    async fn migrate(&self, old_key: &Key, new_password: &str) -> Result<(), CustodyError> {
        let vaults = self.load_vaults().await?;
        info!(vaults = vaults.len(), "password migration started");

        let mut secrets: Vec<Zeroizing<Vec<u8>>> = Vec::with_capacity(vaults.len());
        for vault in &vaults {
            match vault.encrypted_data.unseal(old_key) {
                Ok(plain) => secrets.push(plain),
                Err(_) => {
                    warn!(vault_id = %vault.id, "password migration aborted");
                    return Err(CustodyError::MigrationAborted {
                        vault_id: vault.id.clone(),
                    });
                }
            }
        }

        let (new_key, new_print) = Key::create_blocking(new_password.to_string(), self.kdf).await?;

        let mut migrated: Vec<Vault> = Vec::with_capacity(vaults.len());
        for (vault, secret) in vaults.iter().zip(&secrets) {
            let mut vault = vault.clone();
            vault.encrypted_data = SealedBox::seal(&new_key, secret)?;
            if let Some(airgap) = vault.airgap_mut() {
                airgap.airgap_only = false;
            }
            migrated.push(vault);
        }

        let record = serde_json::to_value(&migrated).map_err(StorageError::from)?;
        let pending = PendingKeyPrint {
            print: new_print.clone(),
            vaults_digest: vaults_digest(&record)?,
        };
        storage::save(self.store.as_ref(), PENDING_KEY_PRINT_KEY, &pending).await?;

        if let Err(err) = self.save_vaults(&migrated).await {
            self.discard_pending_print().await;
            return Err(err);
        }
        if let Err(err) = storage::save(self.store.as_ref(), KEY_PRINT_KEY, &new_print).await {
            warn!(error = %err, "key print write failed, restoring previous vaults");
            if let Err(restore) = self.save_vaults(&vaults).await {
                warn!(error = %restore, "vault restore failed");
            }
            self.discard_pending_print().await;
            return Err(err.into());
        }
        self.discard_pending_print().await;

        self.session.install(new_key);
        self.set_state(KeyringState::Unlocked);
        info!(vaults = migrated.len(), "password migration committed");
        Ok(())
    }

    async fn discard_pending_print(&self) {
        if let Err(err) = self.store.remove(PENDING_KEY_PRINT_KEY).await {
            warn!(error = %err, "staged key print could not be removed");
        }
    }

    /// Completes a password change whose vaults were written but whose key
    /// print was not, or drops the staged print if the vaults never changed.
    /// Caller holds `writes`.
    pub(super) async fn settle_pending_print(&self) -> Result<(), CustodyError> {
        let Some(pending): Option<PendingKeyPrint> =
            storage::load(self.store.as_ref(), PENDING_KEY_PRINT_KEY).await?
        else {
            return Ok(());
        };
        let record = self
            .store
            .get(VAULTS_KEY)
            .await?
            .unwrap_or_else(|| Value::Array(Vec::new()));
        if vaults_digest(&record)? == pending.vaults_digest {
            storage::save(self.store.as_ref(), KEY_PRINT_KEY, &pending.print).await?;
            // Any live session key predates the promoted print.
            self.session.lock();
            warn!("interrupted password change completed");
        } else {
            warn!("interrupted password change discarded");
        }
        self.store.remove(PENDING_KEY_PRINT_KEY).await?;
        Ok(())
    }

    /// Waits out any password change in progress, so the key installed here
    /// always matches the stored key print.
    pub async fn unlock(&self, password: &str) -> Result<(), CustodyError> {
        let _guard = self.writes.lock().await;
        let print = self
            .load_key_print()
            .await?
            .ok_or(CustodyError::PasswordRequired)?;
        match Key::recreate_blocking(password.to_string(), print).await? {
            Some(key) => {
                self.session.install(key);
                self.set_state(KeyringState::Unlocked);
                Ok(())
            }
            None => {
                info!("unlock rejected");
                Err(CustodyError::WrongPassword)
            }
        }
    }

    /// Discards the session key. Hosts should also drop any process that may
    /// have copied it.
    pub fn lock(&self) {
        self.session.lock();
        let next = match self.state() {
            KeyringState::Empty | KeyringState::NotLoaded => self.state(),
            _ => KeyringState::Locked,
        };
        self.set_state(next);
    }

    /// Re-derives and discards. Leaves the session untouched.
    pub async fn check_password(&self, password: &str) -> Result<bool, CustodyError> {
        let Some(print) = self.load_key_print().await? else {
            return Ok(false);
        };
        Ok(Key::recreate_blocking(password.to_string(), print)
            .await?
            .is_some())
    }

    /// Key for an air-gap import made without a password: the live session,
    /// else a fresh or re-derived default key. Returns whether the vault
    /// belongs to the default-password epoch.
    pub(super) async fn ensure_airgap_key(&self, vaults: &[Vault]) -> Result<bool, CustodyError> {
        let Some(print) = self.load_key_print().await? else {
            let (key, print) = Key::create_blocking(DEFAULT_PASSWORD.to_string(), self.kdf).await?;
            storage::save(self.store.as_ref(), KEY_PRINT_KEY, &print).await?;
            self.session.install(key);
            self.set_state(KeyringState::Unlocked);
            warn!("default-password epoch created; wallet has no password protection");
            return Ok(true);
        };
        if self.session.is_unlocked() {
            return Ok(is_default_epoch(vaults));
        }
        match Key::recreate_blocking(DEFAULT_PASSWORD.to_string(), print).await? {
            Some(key) => {
                self.session.install(key);
                self.set_state(KeyringState::Unlocked);
                Ok(true)
            }
            None => Err(CustodyError::Locked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::keyring;
    use super::*;

    #[tokio::test]
    async fn empty_password_is_refused() {
        let kr = keyring();
        kr.init().await.unwrap();
        assert!(matches!(kr.set_password("").await, Err(CustodyError::EmptyPassword)));
    }

    #[tokio::test]
    async fn second_set_password_is_refused() {
        let kr = keyring();
        kr.init().await.unwrap();
        kr.set_password("one").await.unwrap();
        assert!(matches!(
            kr.set_password("two").await,
            Err(CustodyError::PasswordAlreadySet)
        ));
        assert!(kr.check_password("one").await.unwrap());
    }

    #[tokio::test]
    async fn unlock_and_check() {
        let kr = keyring();
        kr.init().await.unwrap();
        assert!(matches!(kr.unlock("x").await, Err(CustodyError::PasswordRequired)));
        kr.set_password("pw").await.unwrap();
        kr.lock();
        assert_eq!(kr.state(), KeyringState::Locked);
        assert!(matches!(kr.unlock("nope").await, Err(CustodyError::WrongPassword)));
        assert_eq!(kr.state(), KeyringState::Locked);
        assert!(kr.check_password("pw").await.unwrap());
        assert!(!kr.session().is_unlocked());
        kr.unlock("pw").await.unwrap();
        assert_eq!(kr.state(), KeyringState::Unlocked);
    }

    #[tokio::test]
    async fn change_password_reseals_vaults() {
        let kr = keyring();
        kr.init().await.unwrap();
        kr.set_password("old").await.unwrap();
        let id = kr.new_mnemonic_vault("abandon ability zoo", "W").await.unwrap();

        assert!(matches!(
            kr.change_password("wrong", "new").await,
            Err(CustodyError::WrongPassword)
        ));
        kr.change_password("old", "new").await.unwrap();
        kr.lock();
        assert!(kr.unlock("old").await.is_err());
        kr.unlock("new").await.unwrap();
        assert_eq!(kr.get_mnemonic(&id).await.unwrap().as_str(), "abandon ability zoo");
    }
}
