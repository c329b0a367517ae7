//! Vault records and their public projection.
//!
//! On disk a vault is a flat record with a `type` tag and an `insensitive`
//! plaintext box holding JSON. In memory it is a `Vault` whose `Custody`
//! variant carries only the attributes that custody kind uses. Unknown
//! insensitive fields are kept in `extra` so newer writers are not clobbered.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::CustodyError;
use crate::network::Network;
use crate::qr::ViewingKeyExport;
use crate::sealed_box::SealedBox;

pub const VAULT_RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum VaultKind {
    Mnemonic,
    AirgapSigner,
}

impl fmt::Display for VaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultKind::Mnemonic => f.write_str("mnemonic"),
            VaultKind::AirgapSigner => f.write_str("airgap-signer"),
        }
    }
}

/// Public key material for one network, as exported by a signing device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkViewingKey {
    pub network: Network,
    pub account_index: u32,
    pub mainnet: bool,
    #[serde(with = "crate::encoding::hex_bytes")]
    pub viewing_key: Vec<u8>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::encoding::opt_hex_bytes"
    )]
    pub secondary_key: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MnemonicInsensitive {
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AirgapInsensitive {
    /// Set while the vault is sealed under the default password.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub airgap_only: bool,
    pub device_id: String,
    pub supported_networks: Vec<Network>,
    #[serde(default)]
    pub viewing_keys: Vec<NetworkViewingKey>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AirgapInsensitive {
    pub fn viewing_key(&self, network: Network) -> Option<&NetworkViewingKey> {
        self.viewing_keys.iter().find(|k| k.network == network)
    }

    /// Key exported for exactly this account.
    pub fn account_key(&self, network: Network, account_index: u32) -> Option<&NetworkViewingKey> {
        self.viewing_keys
            .iter()
            .find(|k| k.network == network && k.account_index == account_index)
    }

    /// Adds keys for networks not yet present. Returns the newly added networks.
    pub fn merge_keys(&mut self, keys: Vec<NetworkViewingKey>) -> Vec<Network> {
        let mut added = Vec::new();
        for key in keys {
            if self.viewing_key(key.network).is_some() {
                continue;
            }
            if !self.supported_networks.contains(&key.network) {
                self.supported_networks.push(key.network);
            }
            added.push(key.network);
            self.viewing_keys.push(key);
        }
        added
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Custody {
    Mnemonic(MnemonicInsensitive),
    AirgapSigner(AirgapInsensitive),
}

/// Persisted shape of a vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRecord {
    #[serde(default = "default_version")]
    pub version: u32,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: VaultKind,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub encrypted_data: SealedBox,
    pub insensitive: SealedBox,
}

fn default_version() -> u32 {
    VAULT_RECORD_VERSION
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "VaultRecord")]
pub struct Vault {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub encrypted_data: SealedBox,
    pub custody: Custody,
}

impl Vault {
    pub fn new(name: String, encrypted_data: SealedBox, custody: Custody) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            created_at: Utc::now(),
            encrypted_data,
            custody,
        }
    }

    pub fn kind(&self) -> VaultKind {
        match self.custody {
            Custody::Mnemonic(_) => VaultKind::Mnemonic,
            Custody::AirgapSigner(_) => VaultKind::AirgapSigner,
        }
    }

    pub fn airgap(&self) -> Option<&AirgapInsensitive> {
        match &self.custody {
            Custody::AirgapSigner(a) => Some(a),
            Custody::Mnemonic(_) => None,
        }
    }

    pub fn airgap_mut(&mut self) -> Option<&mut AirgapInsensitive> {
        match &mut self.custody {
            Custody::AirgapSigner(a) => Some(a),
            Custody::Mnemonic(_) => None,
        }
    }

    pub fn is_airgap_only(&self) -> bool {
        self.airgap().map(|a| a.airgap_only).unwrap_or(false)
    }

    pub fn insensitive_json(&self) -> Result<Value, CustodyError> {
        let value = match &self.custody {
            Custody::Mnemonic(m) => serde_json::to_value(m)?,
            Custody::AirgapSigner(a) => serde_json::to_value(a)?,
        };
        Ok(value)
    }

    pub fn key_info(&self, is_selected: bool) -> Result<KeyInfo, CustodyError> {
        Ok(KeyInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind(),
            is_selected,
            created_at: self.created_at,
            insensitive: self.insensitive_json()?,
        })
    }
}

impl TryFrom<VaultRecord> for Vault {
    type Error = String;

    fn try_from(record: VaultRecord) -> Result<Self, Self::Error> {
        if record.version > VAULT_RECORD_VERSION {
            return Err(format!(
                "vault {} has record version {}, newest supported is {}",
                record.id, record.version, VAULT_RECORD_VERSION
            ));
        }
        let text = record
            .insensitive
            .to_plaintext()
            .ok_or_else(|| format!("vault {} has an encrypted insensitive box", record.id))?;
        let value: Value = if text.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(&text).map_err(|e| format!("vault {}: {e}", record.id))?
        };
        let custody = match record.kind {
            VaultKind::Mnemonic => Custody::Mnemonic(
                serde_json::from_value(value).map_err(|e| format!("vault {}: {e}", record.id))?,
            ),
            VaultKind::AirgapSigner => Custody::AirgapSigner(
                serde_json::from_value(value).map_err(|e| format!("vault {}: {e}", record.id))?,
            ),
        };
        Ok(Vault {
            id: record.id,
            name: record.name,
            created_at: record.created_at,
            encrypted_data: record.encrypted_data,
            custody,
        })
    }
}

impl TryFrom<&Vault> for VaultRecord {
    type Error = CustodyError;

    fn try_from(vault: &Vault) -> Result<Self, Self::Error> {
        let insensitive = SealedBox::from_plaintext(&vault.insensitive_json()?.to_string());
        Ok(VaultRecord {
            version: VAULT_RECORD_VERSION,
            id: vault.id.clone(),
            kind: vault.kind(),
            name: vault.name.clone(),
            created_at: vault.created_at,
            encrypted_data: vault.encrypted_data.clone(),
            insensitive,
        })
    }
}

impl Serialize for Vault {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        VaultRecord::try_from(self)
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

/// Public view of a vault. Never carries `encrypted_data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VaultKind,
    pub is_selected: bool,
    pub created_at: DateTime<Utc>,
    pub insensitive: Value,
}

/// Secret payload of an air-gap vault: the raw export codes as scanned.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AirgapDeviceData {
    pub device_id: String,
    pub exports: Vec<String>,
}

/// Scanned viewing-key exports from one signing device.
#[derive(Debug, Clone)]
pub struct AirgapImport {
    pub device_id: String,
    codes: Vec<Vec<u8>>,
    exports: Vec<ViewingKeyExport>,
}

impl AirgapImport {
    /// Decodes every code up front; the device id defaults to a digest of the
    /// first code.
    pub fn from_codes(device_id: Option<String>, codes: Vec<Vec<u8>>) -> Result<Self, CustodyError> {
        if codes.is_empty() {
            return Err(CustodyError::EmptyImport);
        }
        let exports = codes
            .iter()
            .map(|c| ViewingKeyExport::decode(c))
            .collect::<Result<Vec<_>, _>>()?;
        let device_id = device_id.unwrap_or_else(|| {
            let digest = blake3::hash(&codes[0]);
            hex::encode(&digest.as_bytes()[..8])
        });
        let import = Self {
            device_id,
            codes,
            exports,
        };
        if import.viewing_keys().is_empty() {
            return Err(CustodyError::EmptyImport);
        }
        Ok(import)
    }

    pub fn from_hex(device_id: Option<String>, hex_codes: &[String]) -> Result<Self, CustodyError> {
        let codes = hex_codes
            .iter()
            .map(|h| {
                hex::decode(h.trim())
                    .map_err(|e| CustodyError::CorruptRecord(format!("export is not hex: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_codes(device_id, codes)
    }

    /// First non-empty label any export carries.
    pub fn label(&self) -> Option<&str> {
        self.exports
            .iter()
            .map(|e| e.label())
            .find(|l| !l.is_empty())
    }

    /// One key per network; the first export naming a network wins.
    pub fn viewing_keys(&self) -> Vec<NetworkViewingKey> {
        let mut keys: Vec<NetworkViewingKey> = Vec::new();
        for key in self.exports.iter().flat_map(|e| e.viewing_keys()) {
            if !keys.iter().any(|k| k.network == key.network) {
                keys.push(key);
            }
        }
        keys
    }

    pub fn supported_networks(&self) -> Vec<Network> {
        self.viewing_keys().iter().map(|k| k.network).collect()
    }

    pub fn device_data(&self) -> AirgapDeviceData {
        AirgapDeviceData {
            device_id: self.device_id.clone(),
            exports: self.codes.iter().map(hex::encode).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn airgap_vault() -> Vault {
        Vault::new(
            "Signer".into(),
            SealedBox::from_plaintext("{}"),
            Custody::AirgapSigner(AirgapInsensitive {
                airgap_only: true,
                device_id: "dev-1".into(),
                supported_networks: vec![Network::Zcash],
                viewing_keys: vec![NetworkViewingKey {
                    network: Network::Zcash,
                    account_index: 0,
                    mainnet: true,
                    viewing_key: vec![7; 96],
                    secondary_key: None,
                    address: Some("u1test".into()),
                }],
                extra: Map::new(),
            }),
        )
    }

    #[test]
    fn record_round_trip_keeps_custody() {
        let vault = airgap_vault();
        let json = serde_json::to_value(&vault).unwrap();
        assert_eq!(json["type"], "airgap-signer");
        assert_eq!(json["version"], 1);
        assert!(json.get("custody").is_none());
        let back: Vault = serde_json::from_value(json).unwrap();
        assert_eq!(back, vault);
    }

    #[test]
    fn unknown_insensitive_fields_survive() {
        let vault = airgap_vault();
        let mut record = VaultRecord::try_from(&vault).unwrap();
        let mut insensitive: Value =
            serde_json::from_str(&record.insensitive.to_plaintext().unwrap()).unwrap();
        insensitive["futureField"] = json!("kept");
        record.insensitive = SealedBox::from_plaintext(&insensitive.to_string());

        let loaded = Vault::try_from(record).unwrap();
        let again = VaultRecord::try_from(&loaded).unwrap();
        let text = again.insensitive.to_plaintext().unwrap();
        assert!(text.contains("futureField"));
    }

    #[test]
    fn airgap_only_flag_is_omitted_when_clear() {
        let mut vault = airgap_vault();
        assert!(vault.key_info(false).unwrap().insensitive["airgapOnly"] == json!(true));
        vault.airgap_mut().unwrap().airgap_only = false;
        assert!(vault.key_info(false).unwrap().insensitive.get("airgapOnly").is_none());
    }

    #[test]
    fn newer_record_versions_are_refused() {
        let mut record = VaultRecord::try_from(&airgap_vault()).unwrap();
        record.version = 2;
        assert!(Vault::try_from(record).is_err());
    }

    #[test]
    fn key_info_has_no_secret() {
        let info = airgap_vault().key_info(true).unwrap();
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("encryptedData"));
        assert!(info.is_selected);
    }

    #[test]
    fn merge_skips_known_networks() {
        let mut vault = airgap_vault();
        let airgap = vault.airgap_mut().unwrap();
        let mut dup = airgap.viewing_keys[0].clone();
        dup.viewing_key = vec![1; 96];
        let mut penumbra = dup.clone();
        penumbra.network = Network::Penumbra;
        let added = airgap.merge_keys(vec![dup, penumbra]);
        assert_eq!(added, vec![Network::Penumbra]);
        assert_eq!(airgap.viewing_key(Network::Zcash).unwrap().viewing_key, vec![7; 96]);
        assert_eq!(airgap.supported_networks, vec![Network::Zcash, Network::Penumbra]);
    }

    #[test]
    fn account_key_requires_matching_account() {
        let vault = airgap_vault();
        let airgap = vault.airgap().unwrap();
        assert!(airgap.account_key(Network::Zcash, 0).is_some());
        assert!(airgap.account_key(Network::Zcash, 7).is_none());
        assert!(airgap.account_key(Network::Penumbra, 0).is_none());
    }

    #[test]
    fn serialised_vault_is_the_record() {
        let vault = airgap_vault();
        let direct = serde_json::to_value(&vault).unwrap();
        let record = serde_json::to_value(VaultRecord::try_from(&vault).unwrap()).unwrap();
        assert_eq!(direct, record);
        assert!(vault.insensitive_json().unwrap().is_object());
    }
}
