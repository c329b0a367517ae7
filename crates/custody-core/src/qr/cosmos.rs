//! Cosmos-family codec (chain id 0x05). One code covers every cosmos network;
//! the network itself travels as a one-byte code.
//!
//! Export:     flags, u32 account, u8 label, [33 secp256k1 pubkey],
//!             [u8 n × (u8 network code, u8 address)]
//! Sign req:   u32 account, u8 network code, u8 chain id, 32 sign-doc hash,
//!             u32 sign doc, u16 summary
//! Signatures: 32 sign-doc hash, 64 signature, 33 pubkey

use super::{
    write_header, write_u16_bytes, write_u32_bytes, write_u8_str, OpType, QrError, Reader,
    FLAG_ADDRESS, FLAG_MAINNET, FLAG_PRIMARY_KEY, FLAG_SECONDARY_KEY, SIGNATURE_LEN,
};
use crate::network::{ChainFamily, Network};
use crate::vault::NetworkViewingKey;

pub const PUBKEY_LEN: usize = 33;
pub const SIGN_DOC_HASH_LEN: usize = 32;

const FAMILY: ChainFamily = ChainFamily::Cosmos;

fn network_code(network: Network) -> Result<u8, QrError> {
    network
        .cosmos_code()
        .ok_or(QrError::UnsupportedNetwork(network))
}

fn read_network(r: &mut Reader<'_>) -> Result<Network, QrError> {
    let code = r.u8("network code")?;
    Network::from_cosmos_code(code).ok_or(QrError::UnknownNetworkCode(code))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubkeyExport {
    pub mainnet: bool,
    pub account_index: u32,
    pub label: String,
    pub pubkey: Option<[u8; PUBKEY_LEN]>,
    pub addresses: Vec<(Network, String)>,
}

impl PubkeyExport {
    pub fn encode(&self) -> Result<Vec<u8>, QrError> {
        let mut flags = 0u8;
        if self.mainnet {
            flags |= FLAG_MAINNET;
        }
        if self.pubkey.is_some() {
            flags |= FLAG_PRIMARY_KEY;
        }
        if !self.addresses.is_empty() {
            flags |= FLAG_ADDRESS;
        }
        let mut out = Vec::with_capacity(8 + self.label.len() + PUBKEY_LEN + 48 * self.addresses.len());
        write_header(&mut out, FAMILY, OpType::Export);
        out.push(flags);
        out.extend_from_slice(&self.account_index.to_le_bytes());
        write_u8_str(&mut out, "label", &self.label)?;
        if let Some(pubkey) = &self.pubkey {
            out.extend_from_slice(pubkey);
        }
        if !self.addresses.is_empty() {
            if self.addresses.len() > u8::MAX as usize {
                return Err(QrError::FieldTooLong {
                    field: "addresses",
                    len: self.addresses.len(),
                    max: u8::MAX as usize,
                });
            }
            out.push(self.addresses.len() as u8);
            for (network, address) in &self.addresses {
                out.push(network_code(*network)?);
                write_u8_str(&mut out, "address", address)?;
            }
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, QrError> {
        let mut r = Reader::open(bytes, FAMILY, OpType::Export)?;
        let flags = r.flags()?;
        if flags & FLAG_SECONDARY_KEY != 0 {
            return Err(QrError::InvalidFlags(flags));
        }
        let account_index = r.u32("account index")?;
        let label = r.u8_str("label")?;
        let pubkey = if flags & FLAG_PRIMARY_KEY != 0 {
            Some(r.array::<PUBKEY_LEN>("pubkey")?)
        } else {
            None
        };
        let mut addresses = Vec::new();
        if flags & FLAG_ADDRESS != 0 {
            let count = r.u8("addresses")?;
            for _ in 0..count {
                let network = read_network(&mut r)?;
                addresses.push((network, r.u8_str("address")?));
            }
        }
        r.finish()?;
        Ok(Self {
            mainnet: flags & FLAG_MAINNET != 0,
            account_index,
            label,
            pubkey,
            addresses,
        })
    }

    /// Every listed address shares the one pubkey.
    pub fn viewing_keys(&self) -> Vec<NetworkViewingKey> {
        let Some(pubkey) = self.pubkey else {
            return Vec::new();
        };
        self.addresses
            .iter()
            .map(|(network, address)| NetworkViewingKey {
                network: *network,
                account_index: self.account_index,
                mainnet: self.mainnet,
                viewing_key: pubkey.to_vec(),
                secondary_key: None,
                address: Some(address.clone()),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub account_index: u32,
    pub network: Network,
    pub chain_id: String,
    pub sign_doc_hash: [u8; SIGN_DOC_HASH_LEN],
    pub sign_doc: Vec<u8>,
    pub summary: String,
}

impl SignRequest {
    pub fn encode(&self) -> Result<Vec<u8>, QrError> {
        let mut out = Vec::with_capacity(
            48 + self.chain_id.len() + self.sign_doc.len() + self.summary.len(),
        );
        write_header(&mut out, FAMILY, OpType::SignRequest);
        out.extend_from_slice(&self.account_index.to_le_bytes());
        out.push(network_code(self.network)?);
        write_u8_str(&mut out, "chain id", &self.chain_id)?;
        out.extend_from_slice(&self.sign_doc_hash);
        write_u32_bytes(&mut out, "sign doc", &self.sign_doc)?;
        write_u16_bytes(&mut out, "summary", self.summary.as_bytes())?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, QrError> {
        let mut r = Reader::open(bytes, FAMILY, OpType::SignRequest)?;
        let request = Self {
            account_index: r.u32("account index")?,
            network: read_network(&mut r)?,
            chain_id: r.u8_str("chain id")?,
            sign_doc_hash: r.array("sign doc hash")?,
            sign_doc: r.u32_bytes("sign doc")?,
            summary: r.u16_str("summary")?,
        };
        r.finish()?;
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signatures {
    pub sign_doc_hash: [u8; SIGN_DOC_HASH_LEN],
    pub signature: [u8; SIGNATURE_LEN],
    pub pubkey: [u8; PUBKEY_LEN],
}

impl Signatures {
    pub fn encode(&self) -> Result<Vec<u8>, QrError> {
        let mut out = Vec::with_capacity(3 + SIGN_DOC_HASH_LEN + SIGNATURE_LEN + PUBKEY_LEN);
        write_header(&mut out, FAMILY, OpType::Signatures);
        out.extend_from_slice(&self.sign_doc_hash);
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.pubkey);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, QrError> {
        let mut r = Reader::open(bytes, FAMILY, OpType::Signatures)?;
        let sigs = Self {
            sign_doc_hash: r.array("sign doc hash")?,
            signature: r.array("signature")?,
            pubkey: r.array("pubkey")?,
        };
        r.finish()?;
        Ok(sigs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_lists_one_key_per_address() {
        let export = PubkeyExport {
            mainnet: true,
            account_index: 0,
            label: "ledger-ish".into(),
            pubkey: Some([2; PUBKEY_LEN]),
            addresses: vec![
                (Network::Osmosis, "osmo1abc".into()),
                (Network::Noble, "noble1abc".into()),
            ],
        };
        let decoded = PubkeyExport::decode(&export.encode().unwrap()).unwrap();
        assert_eq!(decoded, export);
        let keys = decoded.viewing_keys();
        assert_eq!(
            keys.iter().map(|k| k.network).collect::<Vec<_>>(),
            vec![Network::Osmosis, Network::Noble]
        );
        assert!(keys.iter().all(|k| k.viewing_key == vec![2; PUBKEY_LEN]));
    }

    #[test]
    fn non_cosmos_address_cannot_be_encoded() {
        let export = PubkeyExport {
            mainnet: true,
            account_index: 0,
            label: String::new(),
            pubkey: Some([2; PUBKEY_LEN]),
            addresses: vec![(Network::Zcash, "u1".into())],
        };
        assert_eq!(
            export.encode(),
            Err(QrError::UnsupportedNetwork(Network::Zcash))
        );
    }

    #[test]
    fn unknown_network_code_is_reported() {
        let mut bytes = PubkeyExport {
            mainnet: true,
            account_index: 0,
            label: String::new(),
            pubkey: None,
            addresses: vec![(Network::Celestia, "celestia1".into())],
        }
        .encode()
        .unwrap();
        // [hdr 3][flags][account 4][label len 0][count] -> network code at 10
        bytes[10] = 0x7e;
        assert_eq!(
            PubkeyExport::decode(&bytes),
            Err(QrError::UnknownNetworkCode(0x7e))
        );
    }

    #[test]
    fn sign_request_round_trip() {
        let req = SignRequest {
            account_index: 3,
            network: Network::CosmosHub,
            chain_id: "cosmoshub-4".into(),
            sign_doc_hash: [7; SIGN_DOC_HASH_LEN],
            sign_doc: br#"{"msgs":[]}"#.to_vec(),
            summary: "Send 1 ATOM".into(),
        };
        assert_eq!(SignRequest::decode(&req.encode().unwrap()).unwrap(), req);
    }

    #[test]
    fn signatures_round_trip() {
        let sigs = Signatures {
            sign_doc_hash: [7; SIGN_DOC_HASH_LEN],
            signature: [8; SIGNATURE_LEN],
            pubkey: [2; PUBKEY_LEN],
        };
        let bytes = sigs.encode().unwrap();
        assert_eq!(bytes.len(), 3 + 32 + 64 + 33);
        assert_eq!(Signatures::decode(&bytes).unwrap(), sigs);
        assert!(matches!(
            Signatures::decode(&bytes[..bytes.len() - 1]),
            Err(QrError::Truncated { field: "pubkey", .. })
        ));
    }
}
