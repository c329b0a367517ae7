//! Zcash codec (chain id 0x04), compatible with the zafu cold-signing layout.
//!
//! Export:     flags, u32 account, u8 label, [96 orchard fvk],
//!             [u16 transparent xpub], [u16 address]
//! Sign req:   u32 account, 32 sighash, u16 n × 32 orchard alphas, u16 summary
//! Signatures: 32 sighash, u16 n × (u16 transparent sig), u16 n × 64 orchard sigs

use super::{
    write_header, write_u16_bytes, write_u16_list, write_u8_str, OpType, QrError, Reader,
    FLAG_ADDRESS, FLAG_MAINNET, FLAG_PRIMARY_KEY, FLAG_SECONDARY_KEY, RANDOMIZER_LEN,
    SIGNATURE_LEN,
};
use crate::network::{ChainFamily, Network};
use crate::vault::NetworkViewingKey;

pub const ORCHARD_FVK_LEN: usize = 96;
pub const SIGHASH_LEN: usize = 32;

const FAMILY: ChainFamily = ChainFamily::Zcash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FvkExport {
    pub mainnet: bool,
    pub account_index: u32,
    pub label: String,
    pub orchard_fvk: Option<[u8; ORCHARD_FVK_LEN]>,
    pub transparent_xpub: Option<Vec<u8>>,
    pub address: Option<String>,
}

impl FvkExport {
    pub fn encode(&self) -> Result<Vec<u8>, QrError> {
        let mut flags = 0u8;
        if self.mainnet {
            flags |= FLAG_MAINNET;
        }
        if self.orchard_fvk.is_some() {
            flags |= FLAG_PRIMARY_KEY;
        }
        if self.transparent_xpub.is_some() {
            flags |= FLAG_SECONDARY_KEY;
        }
        if self.address.is_some() {
            flags |= FLAG_ADDRESS;
        }
        let mut out = Vec::with_capacity(8 + self.label.len() + ORCHARD_FVK_LEN);
        write_header(&mut out, FAMILY, OpType::Export);
        out.push(flags);
        out.extend_from_slice(&self.account_index.to_le_bytes());
        write_u8_str(&mut out, "label", &self.label)?;
        if let Some(fvk) = &self.orchard_fvk {
            out.extend_from_slice(fvk);
        }
        if let Some(xpub) = &self.transparent_xpub {
            write_u16_bytes(&mut out, "transparent xpub", xpub)?;
        }
        if let Some(address) = &self.address {
            write_u16_bytes(&mut out, "address", address.as_bytes())?;
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, QrError> {
        let mut r = Reader::open(bytes, FAMILY, OpType::Export)?;
        let flags = r.flags()?;
        let account_index = r.u32("account index")?;
        let label = r.u8_str("label")?;
        let orchard_fvk = if flags & FLAG_PRIMARY_KEY != 0 {
            Some(r.array::<ORCHARD_FVK_LEN>("orchard fvk")?)
        } else {
            None
        };
        let transparent_xpub = if flags & FLAG_SECONDARY_KEY != 0 {
            Some(r.u16_bytes("transparent xpub")?)
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
            orchard_fvk,
            transparent_xpub,
            address,
        })
    }

    /// Orchard FVK is the viewing key; a transparent-only export has none.
    pub fn viewing_keys(&self) -> Vec<NetworkViewingKey> {
        self.orchard_fvk
            .map(|fvk| NetworkViewingKey {
                network: Network::Zcash,
                account_index: self.account_index,
                mainnet: self.mainnet,
                viewing_key: fvk.to_vec(),
                secondary_key: self.transparent_xpub.clone(),
                address: self.address.clone(),
            })
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub account_index: u32,
    pub sighash: [u8; SIGHASH_LEN],
    pub orchard_alphas: Vec<[u8; RANDOMIZER_LEN]>,
    pub summary: String,
}

impl SignRequest {
    pub fn encode(&self) -> Result<Vec<u8>, QrError> {
        let mut out = Vec::with_capacity(
            3 + 4 + SIGHASH_LEN + 2 + RANDOMIZER_LEN * self.orchard_alphas.len() + 2
                + self.summary.len(),
        );
        write_header(&mut out, FAMILY, OpType::SignRequest);
        out.extend_from_slice(&self.account_index.to_le_bytes());
        out.extend_from_slice(&self.sighash);
        write_u16_list(&mut out, "orchard alphas", &self.orchard_alphas)?;
        write_u16_bytes(&mut out, "summary", self.summary.as_bytes())?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, QrError> {
        let mut r = Reader::open(bytes, FAMILY, OpType::SignRequest)?;
        let request = Self {
            account_index: r.u32("account index")?,
            sighash: r.array("sighash")?,
            orchard_alphas: r.u16_list("orchard alphas")?,
            summary: r.u16_str("summary")?,
        };
        r.finish()?;
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signatures {
    pub sighash: [u8; SIGHASH_LEN],
    pub transparent: Vec<Vec<u8>>,
    pub orchard: Vec<[u8; SIGNATURE_LEN]>,
}

impl Signatures {
    pub fn encode(&self) -> Result<Vec<u8>, QrError> {
        let mut out = Vec::with_capacity(3 + SIGHASH_LEN + 4 + SIGNATURE_LEN * self.orchard.len());
        write_header(&mut out, FAMILY, OpType::Signatures);
        out.extend_from_slice(&self.sighash);
        if self.transparent.len() > u16::MAX as usize {
            return Err(QrError::FieldTooLong {
                field: "transparent signatures",
                len: self.transparent.len(),
                max: u16::MAX as usize,
            });
        }
        out.extend_from_slice(&(self.transparent.len() as u16).to_le_bytes());
        for sig in &self.transparent {
            write_u16_bytes(&mut out, "transparent signature", sig)?;
        }
        write_u16_list(&mut out, "orchard signatures", &self.orchard)?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, QrError> {
        let mut r = Reader::open(bytes, FAMILY, OpType::Signatures)?;
        let sighash = r.array("sighash")?;
        let count = r.u16("transparent signatures")? as usize;
        let mut transparent = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            transparent.push(r.u16_bytes("transparent signature")?);
        }
        let orchard = r.u16_list("orchard signatures")?;
        r.finish()?;
        Ok(Self {
            sighash,
            transparent,
            orchard,
        })
    }
}
