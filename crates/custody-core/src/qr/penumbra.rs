//! Penumbra codec (chain id 0x03).
//!
//! Export:     flags, u32 account, u8 label, [64 fvk], [u16 address]
//! Sign req:   u32 account, 64 effect hash, u16 n × 32 spend randomizers,
//!             u16 n × 32 vote randomizers, u32 plan, u16 summary
//! Signatures: 64 effect hash, u16 n × 64 spend auths, u16 n × 64 vote auths

use super::{
    write_header, write_u16_bytes, write_u16_list, write_u32_bytes, write_u8_str, OpType, QrError,
    Reader, FLAG_ADDRESS, FLAG_MAINNET, FLAG_PRIMARY_KEY, FLAG_SECONDARY_KEY, RANDOMIZER_LEN,
    SIGNATURE_LEN,
};
use crate::network::{ChainFamily, Network};
use crate::vault::NetworkViewingKey;

pub const FVK_LEN: usize = 64;
pub const EFFECT_HASH_LEN: usize = 64;

const FAMILY: ChainFamily = ChainFamily::Penumbra;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FvkExport {
    pub mainnet: bool,
    pub account_index: u32,
    pub label: String,
    pub fvk: Option<[u8; FVK_LEN]>,
    pub address: Option<String>,
}

impl FvkExport {
    pub fn encode(&self) -> Result<Vec<u8>, QrError> {
        let mut flags = 0u8;
        if self.mainnet {
            flags |= FLAG_MAINNET;
        }
        if self.fvk.is_some() {
            flags |= FLAG_PRIMARY_KEY;
        }
        if self.address.is_some() {
            flags |= FLAG_ADDRESS;
        }
        let mut out = Vec::with_capacity(8 + self.label.len() + FVK_LEN);
        write_header(&mut out, FAMILY, OpType::Export);
        out.push(flags);
        out.extend_from_slice(&self.account_index.to_le_bytes());
        write_u8_str(&mut out, "label", &self.label)?;
        if let Some(fvk) = &self.fvk {
            out.extend_from_slice(fvk);
        }
        if let Some(address) = &self.address {
            write_u16_bytes(&mut out, "address", address.as_bytes())?;
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
        let fvk = if flags & FLAG_PRIMARY_KEY != 0 {
            Some(r.array::<FVK_LEN>("full viewing key")?)
        } else {
            None
        };
        let address = if flags & FLAG_ADDRESS != 0 {
            Some(r.u16_str("address")?)
        } else {
            None
        };
        r.finish()?;
        Ok(Self {
            mainnet: flags & FLAG_MAINNET != 0,
            account_index,
            label,
            fvk,
            address,
        })
    }

    pub fn viewing_keys(&self) -> Vec<NetworkViewingKey> {
        self.fvk
            .map(|fvk| NetworkViewingKey {
                network: Network::Penumbra,
                account_index: self.account_index,
                mainnet: self.mainnet,
                viewing_key: fvk.to_vec(),
                secondary_key: None,
                address: self.address.clone(),
            })
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub account_index: u32,
    pub effect_hash: [u8; EFFECT_HASH_LEN],
    pub spend_randomizers: Vec<[u8; RANDOMIZER_LEN]>,
    pub vote_randomizers: Vec<[u8; RANDOMIZER_LEN]>,
    pub plan: Vec<u8>,
    pub summary: String,
}

impl SignRequest {
    pub fn encode(&self) -> Result<Vec<u8>, QrError> {
        let mut out = Vec::with_capacity(
            80 + RANDOMIZER_LEN * (self.spend_randomizers.len() + self.vote_randomizers.len())
                + self.plan.len()
                + self.summary.len(),
        );
        write_header(&mut out, FAMILY, OpType::SignRequest);
        out.extend_from_slice(&self.account_index.to_le_bytes());
        out.extend_from_slice(&self.effect_hash);
        write_u16_list(&mut out, "spend randomizers", &self.spend_randomizers)?;
        write_u16_list(&mut out, "vote randomizers", &self.vote_randomizers)?;
        write_u32_bytes(&mut out, "plan", &self.plan)?;
        write_u16_bytes(&mut out, "summary", self.summary.as_bytes())?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, QrError> {
        let mut r = Reader::open(bytes, FAMILY, OpType::SignRequest)?;
        let request = Self {
            account_index: r.u32("account index")?,
            effect_hash: r.array("effect hash")?,
            spend_randomizers: r.u16_list("spend randomizers")?,
            vote_randomizers: r.u16_list("vote randomizers")?,
            plan: r.u32_bytes("plan")?,
            summary: r.u16_str("summary")?,
        };
        r.finish()?;
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signatures {
    pub effect_hash: [u8; EFFECT_HASH_LEN],
    pub spend_auths: Vec<[u8; SIGNATURE_LEN]>,
    pub vote_auths: Vec<[u8; SIGNATURE_LEN]>,
}

impl Signatures {
    pub fn encode(&self) -> Result<Vec<u8>, QrError> {
        let mut out = Vec::with_capacity(
            EFFECT_HASH_LEN + 7 + SIGNATURE_LEN * (self.spend_auths.len() + self.vote_auths.len()),
        );
        write_header(&mut out, FAMILY, OpType::Signatures);
        out.extend_from_slice(&self.effect_hash);
        write_u16_list(&mut out, "spend auths", &self.spend_auths)?;
        write_u16_list(&mut out, "vote auths", &self.vote_auths)?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, QrError> {
        let mut r = Reader::open(bytes, FAMILY, OpType::Signatures)?;
        let sigs = Self {
            effect_hash: r.array("effect hash")?,
            spend_auths: r.u16_list("spend auths")?,
            vote_auths: r.u16_list("vote auths")?,
        };
        r.finish()?;
        Ok(sigs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> SignRequest {
        SignRequest {
            account_index: 2,
            effect_hash: [0xab; EFFECT_HASH_LEN],
            spend_randomizers: vec![[1; 32], [2; 32]],
            vote_randomizers: vec![],
            plan: b"plan bytes".to_vec(),
            summary: "Send 1 UM to penumbra1xyz".into(),
        }
    }

    #[test]
    fn export_round_trip_with_and_without_fields() {
        let full = FvkExport {
            mainnet: true,
            account_index: 7,
            label: "Pocket".into(),
            fvk: Some([9; FVK_LEN]),
            address: Some("penumbra1abc".into()),
        };
        assert_eq!(FvkExport::decode(&full.encode().unwrap()).unwrap(), full);

        let bare = FvkExport {
            mainnet: false,
            account_index: 0,
            label: String::new(),
            fvk: None,
            address: None,
        };
        let bytes = bare.encode().unwrap();
        assert_eq!(bytes, vec![0x53, 0x03, 0x01, 0x00, 0, 0, 0, 0, 0]);
        assert_eq!(FvkExport::decode(&bytes).unwrap(), bare);
        assert!(bare.viewing_keys().is_empty());
    }

    #[test]
    fn sign_request_round_trip() {
        let req = sample_request();
        let bytes = req.encode().unwrap();
        assert_eq!(&bytes[..3], &[0x53, 0x03, 0x02]);
        assert_eq!(SignRequest::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn signatures_round_trip() {
        let sigs = Signatures {
            effect_hash: [3; EFFECT_HASH_LEN],
            spend_auths: vec![[4; 64]],
            vote_auths: vec![[5; 64], [6; 64]],
        };
        assert_eq!(Signatures::decode(&sigs.encode().unwrap()).unwrap(), sigs);
    }

    #[test]
    fn request_is_not_a_signature_response() {
        let bytes = sample_request().encode().unwrap();
        assert_eq!(
            Signatures::decode(&bytes),
            Err(QrError::WrongOpType {
                got: 0x02,
                expected: 0x03
            })
        );
    }

    #[test]
    fn truncated_spend_auths_name_the_field() {
        let sigs = Signatures {
            effect_hash: [3; EFFECT_HASH_LEN],
            spend_auths: vec![[4; 64], [4; 64]],
            vote_auths: vec![],
        };
        let bytes = sigs.encode().unwrap();
        let cut = &bytes[..3 + EFFECT_HASH_LEN + 2 + 70];
        assert!(matches!(
            Signatures::decode(cut),
            Err(QrError::Truncated {
                field: "spend auths",
                needed: 128,
                ..
            })
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = sample_request().encode().unwrap();
        bytes.push(0);
        assert_eq!(SignRequest::decode(&bytes), Err(QrError::TrailingBytes(1)));
    }

    #[test]
    fn secondary_key_flag_is_invalid_here() {
        let bytes = [0x53, 0x03, 0x01, FLAG_SECONDARY_KEY, 0, 0, 0, 0, 0];
        assert_eq!(
            FvkExport::decode(&bytes),
            Err(QrError::InvalidFlags(FLAG_SECONDARY_KEY))
        );
    }
}
