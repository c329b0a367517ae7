use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Networks the wallet can hold keys for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Penumbra,
    Zcash,
    Osmosis,
    Noble,
    Nomic,
    Celestia,
    CosmosHub,
}

/// Wire family of a network; one QR chain id per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    Penumbra,
    Zcash,
    Cosmos,
}

pub const ALL_NETWORKS: [Network; 7] = [
    Network::Penumbra,
    Network::Zcash,
    Network::Osmosis,
    Network::Noble,
    Network::Nomic,
    Network::Celestia,
    Network::CosmosHub,
];

impl Network {
    pub fn family(self) -> ChainFamily {
        match self {
            Network::Penumbra => ChainFamily::Penumbra,
            Network::Zcash => ChainFamily::Zcash,
            Network::Osmosis
            | Network::Noble
            | Network::Nomic
            | Network::Celestia
            | Network::CosmosHub => ChainFamily::Cosmos,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Penumbra => "penumbra",
            Network::Zcash => "zcash",
            Network::Osmosis => "osmosis",
            Network::Noble => "noble",
            Network::Nomic => "nomic",
            Network::Celestia => "celestia",
            Network::CosmosHub => "cosmoshub",
        }
    }

    /// Network byte inside cosmos-family QR payloads.
    pub fn cosmos_code(self) -> Option<u8> {
        match self {
            Network::Osmosis => Some(0x01),
            Network::Noble => Some(0x02),
            Network::Nomic => Some(0x03),
            Network::Celestia => Some(0x04),
            Network::CosmosHub => Some(0x05),
            Network::Penumbra | Network::Zcash => None,
        }
    }

    pub fn from_cosmos_code(code: u8) -> Option<Network> {
        ALL_NETWORKS
            .iter()
            .copied()
            .find(|n| n.cosmos_code() == Some(code))
    }

    /// Length of the hash a signer binds its signatures to.
    pub fn effect_hash_len(self) -> usize {
        match self.family() {
            ChainFamily::Penumbra => 64,
            ChainFamily::Zcash | ChainFamily::Cosmos => 32,
        }
    }
}

impl ChainFamily {
    pub fn chain_id(self) -> u8 {
        match self {
            ChainFamily::Penumbra => 0x03,
            ChainFamily::Zcash => 0x04,
            ChainFamily::Cosmos => 0x05,
        }
    }

    pub fn from_chain_id(id: u8) -> Option<ChainFamily> {
        match id {
            0x03 => Some(ChainFamily::Penumbra),
            0x04 => Some(ChainFamily::Zcash),
            0x05 => Some(ChainFamily::Cosmos),
            _ => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ALL_NETWORKS
            .iter()
            .copied()
            .find(|n| n.as_str() == wanted)
            .ok_or_else(|| format!("unknown network: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosmos_codes_are_unique_and_reversible() {
        for n in ALL_NETWORKS {
            if let Some(code) = n.cosmos_code() {
                assert_eq!(Network::from_cosmos_code(code), Some(n));
                assert_eq!(n.family(), ChainFamily::Cosmos);
            }
        }
        assert_eq!(Network::from_cosmos_code(0x7f), None);
    }

    #[test]
    fn parse_and_display_agree() {
        for n in ALL_NETWORKS {
            assert_eq!(n.to_string().parse::<Network>().unwrap(), n);
        }
        assert!("dogecoin".parse::<Network>().is_err());
    }
}
