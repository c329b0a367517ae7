use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::KdfParams;
use crate::network::Network;

/// Missing fields take their `Default` values; an explicit `null` timeout
/// disables that timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthorizationSettings {
    /// `None` waits for the user indefinitely; cancellation still applies.
    pub approval_timeout_secs: Option<u64>,
    pub scan_timeout_secs: Option<u64>,
    pub max_password_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CustodySettings {
    pub kdf: KdfParams,
    pub authorization: AuthorizationSettings,
    pub default_networks: Vec<Network>,
}

impl Default for AuthorizationSettings {
    fn default() -> Self {
        Self {
            approval_timeout_secs: None,
            scan_timeout_secs: Some(300),
            max_password_attempts: 3,
        }
    }
}

impl Default for CustodySettings {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            authorization: AuthorizationSettings::default(),
            default_networks: vec![Network::Penumbra, Network::Osmosis, Network::Noble],
        }
    }
}

pub fn load_settings(path: &Path) -> anyhow::Result<CustodySettings> {
    if path.exists() {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    } else {
        Ok(CustodySettings::default())
    }
}

pub fn save_settings(path: &Path, settings: &CustodySettings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(settings)?)?;
    Ok(())
}
