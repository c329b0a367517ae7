//! Vault lifecycle: create, import, attach, select, rename, delete, reveal.

use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{is_default_epoch, Keyring};
use crate::error::CustodyError;
use crate::network::Network;
use crate::qr::ViewingKeyExport;
use crate::sealed_box::SealedBox;
use crate::storage::{self, SELECTED_VAULT_KEY};
use crate::vault::{
    AirgapDeviceData, AirgapImport, AirgapInsensitive, Custody, KeyInfo, MnemonicInsensitive,
    Vault, VaultKind,
};

const DEFAULT_AIRGAP_NAME: &str = "Signing device";

impl Keyring {
    /// Seals a recovery phrase under the session key and selects the new vault.
    pub async fn new_mnemonic_vault(&self, phrase: &str, name: &str) -> Result<String, CustodyError> {
        let _guard = self.writes.lock().await;
        if self.load_key_print().await?.is_none() {
            return Err(CustodyError::Locked);
        }
        let mut vaults = self.load_vaults().await?;
        if is_default_epoch(&vaults) {
            return Err(CustodyError::PasswordRequired);
        }

        let phrase = Zeroizing::new(phrase.split_whitespace().collect::<Vec<_>>().join(" "));
        let sealed = self
            .session
            .with_key(|key| SealedBox::seal(key, phrase.as_bytes()))?;
        let vault = Vault::new(
            name.to_string(),
            sealed,
            Custody::Mnemonic(MnemonicInsensitive::default()),
        );
        let id = vault.id.clone();
        let first = vaults.is_empty();
        vaults.push(vault);
        self.save_vaults(&vaults).await?;
        info!(vault_id = %id, kind = %VaultKind::Mnemonic, "vault created");

        if first {
            for network in self.default_networks.clone() {
                self.enable_network_locked(network).await?;
            }
            if self.active_network_locked().await?.is_none() {
                if let Some(network) = self.default_networks.first() {
                    self.set_active_network_locked(*network).await?;
                }
            }
        }
        self.select_locked(&vaults, &id).await?;
        Ok(id)
    }

    /// Imports a signing device under the current password.
    pub async fn new_airgap_vault(&self, import: &AirgapImport, name: &str) -> Result<String, CustodyError> {
        let _guard = self.writes.lock().await;
        if self.load_key_print().await?.is_none() {
            return Err(CustodyError::PasswordRequired);
        }
        let vaults = self.load_vaults().await?;
        let airgap_only = is_default_epoch(&vaults) && self.session.is_unlocked();
        self.insert_airgap_locked(vaults, import, name, airgap_only)
            .await
    }

    /// Imports a signing device with no password set up. Creates the
    /// default-password epoch when the store is empty.
    pub async fn add_airgap_vault_without_password(
        &self,
        import: &AirgapImport,
        name: &str,
    ) -> Result<String, CustodyError> {
        let _guard = self.writes.lock().await;
        let vaults = self.load_vaults().await?;
        let airgap_only = self.ensure_airgap_key(&vaults).await?;
        self.insert_airgap_locked(vaults, import, name, airgap_only)
            .await
    }

    async fn insert_airgap_locked(
        &self,
        mut vaults: Vec<Vault>,
        import: &AirgapImport,
        name: &str,
        airgap_only: bool,
    ) -> Result<String, CustodyError> {
        let viewing_keys = import.viewing_keys();
        if viewing_keys.is_empty() {
            return Err(CustodyError::EmptyImport);
        }
        let supported_networks: Vec<Network> = viewing_keys.iter().map(|k| k.network).collect();

        let device_data = Zeroizing::new(serde_json::to_vec(&import.device_data())?);
        let sealed = self
            .session
            .with_key(|key| SealedBox::seal(key, &device_data))?;

        let name = match name.trim() {
            "" => import.label().unwrap_or(DEFAULT_AIRGAP_NAME).to_string(),
            n => n.to_string(),
        };
        let vault = Vault::new(
            name,
            sealed,
            Custody::AirgapSigner(AirgapInsensitive {
                airgap_only,
                device_id: import.device_id.clone(),
                supported_networks: supported_networks.clone(),
                viewing_keys: viewing_keys.clone(),
                extra: Default::default(),
            }),
        );
        let id = vault.id.clone();
        let first = vaults.is_empty();
        vaults.push(vault);
        self.save_vaults(&vaults).await?;
        info!(
            vault_id = %id,
            kind = %VaultKind::AirgapSigner,
            networks = ?supported_networks,
            airgap_only,
            "vault created"
        );

        for network in &supported_networks {
            self.enable_network_locked(*network).await?;
        }
        self.register_wallets_locked(&id, &viewing_keys).await?;
        if first {
            self.set_active_network_locked(supported_networks[0]).await?;
            self.select_locked(&vaults, &id).await?;
        }
        Ok(id)
    }

    /// Merges a later-scanned export into an existing air-gap vault. Returns
    /// the networks it added.
    pub async fn attach_airgap_export(&self, vault_id: &str, code: &[u8]) -> Result<Vec<Network>, CustodyError> {
        let export = ViewingKeyExport::decode(code)?;
        let _guard = self.writes.lock().await;
        let mut vaults = self.load_vaults().await?;
        let vault = vaults
            .iter_mut()
            .find(|v| v.id == vault_id)
            .ok_or_else(|| CustodyError::VaultNotFound(vault_id.to_string()))?;
        if vault.kind() != VaultKind::AirgapSigner {
            return Err(CustodyError::WrongVaultType {
                vault_id: vault_id.to_string(),
                expected: VaultKind::AirgapSigner,
            });
        }

        let sealed = &vault.encrypted_data;
        let resealed = self.session.with_key(|key| {
            let plain = sealed.unseal(key)?;
            let mut data: AirgapDeviceData = serde_json::from_slice(&plain)?;
            data.exports.push(hex::encode(code));
            let plain = Zeroizing::new(serde_json::to_vec(&data)?);
            SealedBox::seal(key, &plain)
        })?;

        let airgap = vault.airgap_mut().ok_or_else(|| CustodyError::WrongVaultType {
            vault_id: vault_id.to_string(),
            expected: VaultKind::AirgapSigner,
        })?;
        let added = airgap.merge_keys(export.viewing_keys());
        let new_keys: Vec<_> = airgap
            .viewing_keys
            .iter()
            .filter(|k| added.contains(&k.network))
            .cloned()
            .collect();
        vault.encrypted_data = resealed;

        self.save_vaults(&vaults).await?;
        for network in &added {
            self.enable_network_locked(*network).await?;
        }
        self.register_wallets_locked(vault_id, &new_keys).await?;
        info!(vault_id, networks = ?added, "export attached");
        Ok(added)
    }

    pub async fn select_vault(&self, vault_id: &str) -> Result<(), CustodyError> {
        let _guard = self.writes.lock().await;
        let vaults = self.load_vaults().await?;
        self.select_locked(&vaults, vault_id).await
    }

    async fn select_locked(&self, vaults: &[Vault], vault_id: &str) -> Result<(), CustodyError> {
        if !vaults.iter().any(|v| v.id == vault_id) {
            return Err(CustodyError::VaultNotFound(vault_id.to_string()));
        }
        storage::save(self.store.as_ref(), SELECTED_VAULT_KEY, &vault_id).await?;
        self.sync_active_wallets_locked(vault_id).await?;
        debug!(vault_id, "vault selected");
        Ok(())
    }

    pub async fn rename_vault(&self, vault_id: &str, name: &str) -> Result<(), CustodyError> {
        let _guard = self.writes.lock().await;
        let mut vaults = self.load_vaults().await?;
        let vault = vaults
            .iter_mut()
            .find(|v| v.id == vault_id)
            .ok_or_else(|| CustodyError::VaultNotFound(vault_id.to_string()))?;
        vault.name = name.to_string();
        self.save_vaults(&vaults).await
    }

    /// Refuses the last vault. Cascades wallet records and moves the
    /// selection to the first remaining vault when needed.
    pub async fn delete_vault(&self, vault_id: &str) -> Result<(), CustodyError> {
        let _guard = self.writes.lock().await;
        let mut vaults = self.load_vaults().await?;
        let index = vaults
            .iter()
            .position(|v| v.id == vault_id)
            .ok_or_else(|| CustodyError::VaultNotFound(vault_id.to_string()))?;
        if vaults.len() == 1 {
            return Err(CustodyError::LastVaultDeletionRefused);
        }
        vaults.remove(index);
        self.save_vaults(&vaults).await?;
        self.remove_wallets_locked(vault_id).await?;
        info!(vault_id, remaining = vaults.len(), "vault deleted");

        match self.selected_vault_id().await? {
            Some(selected) if selected != vault_id => self.sync_active_wallets_locked(&selected).await,
            _ => {
                let next = vaults[0].id.clone();
                self.select_locked(&vaults, &next).await
            }
        }
    }

    /// The recovery phrase. Callers drop it as soon as they are done.
    pub async fn get_mnemonic(&self, vault_id: &str) -> Result<Zeroizing<String>, CustodyError> {
        let vault = self.vault(vault_id).await?;
        if vault.kind() != VaultKind::Mnemonic {
            return Err(CustodyError::WrongVaultType {
                vault_id: vault_id.to_string(),
                expected: VaultKind::Mnemonic,
            });
        }
        let plain = self
            .session
            .with_key(|key| vault.encrypted_data.unseal(key))?;
        let phrase = std::str::from_utf8(&plain)
            .map_err(|_| CustodyError::CorruptRecord(format!("vault {vault_id} phrase is not UTF-8")))?;
        Ok(Zeroizing::new(phrase.to_string()))
    }

    pub async fn vault(&self, vault_id: &str) -> Result<Vault, CustodyError> {
        self.load_vaults()
            .await?
            .into_iter()
            .find(|v| v.id == vault_id)
            .ok_or_else(|| CustodyError::VaultNotFound(vault_id.to_string()))
    }

    pub async fn selected_vault_id(&self) -> Result<Option<String>, CustodyError> {
        Ok(storage::load(self.store.as_ref(), SELECTED_VAULT_KEY).await?)
    }

    pub async fn selected_vault(&self) -> Result<Vault, CustodyError> {
        let id = self
            .selected_vault_id()
            .await?
            .ok_or(CustodyError::NoVaultSelected)?;
        self.vault(&id).await
    }

    pub async fn key_infos(&self) -> Result<Vec<KeyInfo>, CustodyError> {
        let selected = self.selected_vault_id().await?;
        self.load_vaults()
            .await?
            .iter()
            .map(|v| v.key_info(selected.as_deref() == Some(v.id.as_str())))
            .collect()
    }
}
