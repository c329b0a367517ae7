//! Enabled networks, the active network, and per-network wallet records
//! derived from vaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Keyring;
use crate::error::CustodyError;
use crate::network::Network;
use crate::storage::{
    self, ACTIVE_NETWORK_KEY, ACTIVE_WALLET_INDEX_KEY, ENABLED_NETWORKS_KEY, NETWORK_WALLETS_KEY,
};
use crate::vault::NetworkViewingKey;

/// Watch-only wallet for one network, keyed by the vault it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkWallet {
    pub vault_id: String,
    pub network: Network,
    pub account_index: u32,
    pub label: String,
    #[serde(with = "crate::encoding::hex_bytes")]
    pub viewing_key: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

type WalletMap = BTreeMap<Network, Vec<NetworkWallet>>;
type IndexMap = BTreeMap<Network, usize>;

impl Keyring {
    pub async fn enabled_networks(&self) -> Result<Vec<Network>, CustodyError> {
        Ok(storage::load(self.store.as_ref(), ENABLED_NETWORKS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn active_network(&self) -> Result<Option<Network>, CustodyError> {
        self.active_network_locked().await
    }

    pub async fn enable_network(&self, network: Network) -> Result<(), CustodyError> {
        let _guard = self.writes.lock().await;
        self.enable_network_locked(network).await
    }

    /// Moves the active network to the first remaining one if it was `network`.
    pub async fn disable_network(&self, network: Network) -> Result<(), CustodyError> {
        let _guard = self.writes.lock().await;
        let mut enabled = self.enabled_networks().await?;
        enabled.retain(|n| *n != network);
        storage::save(self.store.as_ref(), ENABLED_NETWORKS_KEY, &enabled).await?;
        if self.active_network_locked().await? == Some(network) {
            match enabled.first() {
                Some(next) => storage::save(self.store.as_ref(), ACTIVE_NETWORK_KEY, next).await?,
                None => self.store.remove(ACTIVE_NETWORK_KEY).await?,
            }
        }
        debug!(%network, "network disabled");
        Ok(())
    }

    /// Enables `network` too if it was not.
    pub async fn set_active_network(&self, network: Network) -> Result<(), CustodyError> {
        let _guard = self.writes.lock().await;
        self.enable_network_locked(network).await?;
        self.set_active_network_locked(network).await
    }

    pub async fn network_wallets(&self, network: Network) -> Result<Vec<NetworkWallet>, CustodyError> {
        Ok(self
            .load_wallets()
            .await?
            .remove(&network)
            .unwrap_or_default())
    }

    /// Wallet at the network's active index.
    pub async fn active_wallet(&self, network: Network) -> Result<Option<NetworkWallet>, CustodyError> {
        let wallets = self.network_wallets(network).await?;
        let index = self.load_indices().await?.get(&network).copied().unwrap_or(0);
        Ok(wallets.into_iter().nth(index))
    }

    /// Registers a wallet a consumer derived itself, e.g. from a mnemonic vault.
    pub async fn add_network_wallet(&self, wallet: NetworkWallet) -> Result<(), CustodyError> {
        let _guard = self.writes.lock().await;
        let vaults = self.load_vaults().await?;
        if !vaults.iter().any(|v| v.id == wallet.vault_id) {
            return Err(CustodyError::VaultNotFound(wallet.vault_id));
        }
        let mut wallets = self.load_wallets().await?;
        let list = wallets.entry(wallet.network).or_default();
        list.retain(|w| !(w.vault_id == wallet.vault_id && w.account_index == wallet.account_index));
        list.push(wallet);
        storage::save(self.store.as_ref(), NETWORK_WALLETS_KEY, &wallets).await?;
        if let Some(selected) = self.selected_vault_id().await? {
            self.sync_active_wallets_locked(&selected).await?;
        }
        Ok(())
    }

    pub(super) async fn active_network_locked(&self) -> Result<Option<Network>, CustodyError> {
        Ok(storage::load(self.store.as_ref(), ACTIVE_NETWORK_KEY).await?)
    }

    pub(super) async fn enable_network_locked(&self, network: Network) -> Result<(), CustodyError> {
        let mut enabled = self.enabled_networks().await?;
        if enabled.contains(&network) {
            return Ok(());
        }
        enabled.push(network);
        storage::save(self.store.as_ref(), ENABLED_NETWORKS_KEY, &enabled).await?;
        debug!(%network, "network enabled");
        Ok(())
    }

    pub(super) async fn set_active_network_locked(&self, network: Network) -> Result<(), CustodyError> {
        storage::save(self.store.as_ref(), ACTIVE_NETWORK_KEY, &network).await?;
        debug!(%network, "active network set");
        Ok(())
    }

    pub(super) async fn register_wallets_locked(
        &self,
        vault_id: &str,
        keys: &[NetworkViewingKey],
    ) -> Result<(), CustodyError> {
        if keys.is_empty() {
            return Ok(());
        }
        let label = self.vault(vault_id).await?.name;
        let mut wallets = self.load_wallets().await?;
        for key in keys {
            let list = wallets.entry(key.network).or_default();
            list.retain(|w| !(w.vault_id == vault_id && w.account_index == key.account_index));
            list.push(NetworkWallet {
                vault_id: vault_id.to_string(),
                network: key.network,
                account_index: key.account_index,
                label: label.clone(),
                viewing_key: key.viewing_key.clone(),
                address: key.address.clone(),
            });
        }
        storage::save(self.store.as_ref(), NETWORK_WALLETS_KEY, &wallets).await?;
        Ok(())
    }

    pub(super) async fn remove_wallets_locked(&self, vault_id: &str) -> Result<(), CustodyError> {
        let mut wallets = self.load_wallets().await?;
        for list in wallets.values_mut() {
            list.retain(|w| w.vault_id != vault_id);
        }
        wallets.retain(|_, list| !list.is_empty());
        storage::save(self.store.as_ref(), NETWORK_WALLETS_KEY, &wallets).await?;
        Ok(())
    }

    /// Points each network's active index at the selected vault's wallet, and
    /// clamps indices left dangling by deletions.
    pub(super) async fn sync_active_wallets_locked(&self, selected: &str) -> Result<(), CustodyError> {
        let wallets = self.load_wallets().await?;
        let mut indices = self.load_indices().await?;
        for (network, list) in &wallets {
            if let Some(pos) = list.iter().position(|w| w.vault_id == selected) {
                indices.insert(*network, pos);
            } else if indices.get(network).map_or(false, |i| *i >= list.len()) {
                indices.insert(*network, 0);
            }
        }
        indices.retain(|network, _| wallets.contains_key(network));
        storage::save(self.store.as_ref(), ACTIVE_WALLET_INDEX_KEY, &indices).await?;
        Ok(())
    }

    async fn load_wallets(&self) -> Result<WalletMap, CustodyError> {
        Ok(storage::load(self.store.as_ref(), NETWORK_WALLETS_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn load_indices(&self) -> Result<IndexMap, CustodyError> {
        Ok(storage::load(self.store.as_ref(), ACTIVE_WALLET_INDEX_KEY)
            .await?
            .unwrap_or_default())
    }
}
