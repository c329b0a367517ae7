//! Binary QR framing shared by every network codec.
//!
//! ```text
//! [0x53 prelude][chain id][op type][payload ...]
//! ```
//!
//! Integers are little-endian. Variable-length fields carry a length prefix
//! whose width is fixed per field. Decoders check the three header bytes before
//! touching the payload, and report the exact field that ran short.

pub mod cosmos;
pub mod penumbra;
pub mod zcash;

use thiserror::Error;

use crate::network::ChainFamily;
use crate::vault::NetworkViewingKey;

pub const PRELUDE: u8 = 0x53;
pub const HEADER_LEN: usize = 3;

pub const FLAG_MAINNET: u8 = 0x01;
pub const FLAG_PRIMARY_KEY: u8 = 0x02;
pub const FLAG_SECONDARY_KEY: u8 = 0x04;
pub const FLAG_ADDRESS: u8 = 0x08;
const KNOWN_FLAGS: u8 = FLAG_MAINNET | FLAG_PRIMARY_KEY | FLAG_SECONDARY_KEY | FLAG_ADDRESS;

pub const SIGNATURE_LEN: usize = 64;
pub const RANDOMIZER_LEN: usize = 32;
pub const MAX_LABEL_LEN: usize = u8::MAX as usize;
pub const MAX_SUMMARY_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpType {
    Export = 0x01,
    SignRequest = 0x02,
    Signatures = 0x03,
}

impl OpType {
    pub fn from_byte(b: u8) -> Option<OpType> {
        match b {
            0x01 => Some(OpType::Export),
            0x02 => Some(OpType::SignRequest),
            0x03 => Some(OpType::Signatures),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QrError {
    #[error("wrong prelude: got 0x{got:02x}, expected 0x53")]
    WrongPrelude { got: u8 },

    #[error("wrong chain id: got 0x{got:02x}, expected 0x{expected:02x}")]
    WrongChain { got: u8, expected: u8 },

    #[error("unknown chain id 0x{0:02x}")]
    UnknownChain(u8),

    #[error("wrong op type: got 0x{got:02x}, expected 0x{expected:02x}")]
    WrongOpType { got: u8, expected: u8 },

    #[error("unknown op type 0x{0:02x}")]
    UnknownOpType(u8),

    #[error("truncated {field}: needed {needed} bytes, {remaining} left")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("{field} too long: {len} bytes, limit {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("unknown network code 0x{0:02x}")]
    UnknownNetworkCode(u8),

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("invalid flags 0x{0:02x}")]
    InvalidFlags(u8),

    #[error("network {0} cannot be encoded in this message")]
    UnsupportedNetwork(crate::network::Network),
}

/// Chain family and op type of a scanned code, from its first three bytes.
pub fn route(bytes: &[u8]) -> Result<(ChainFamily, OpType), QrError> {
    if bytes.len() < HEADER_LEN {
        return Err(QrError::Truncated {
            field: "header",
            needed: HEADER_LEN,
            remaining: bytes.len(),
        });
    }
    if bytes[0] != PRELUDE {
        return Err(QrError::WrongPrelude { got: bytes[0] });
    }
    let family = ChainFamily::from_chain_id(bytes[1]).ok_or(QrError::UnknownChain(bytes[1]))?;
    let op = OpType::from_byte(bytes[2]).ok_or(QrError::UnknownOpType(bytes[2]))?;
    Ok((family, op))
}

fn is_family_qr(bytes: &[u8], family: ChainFamily) -> bool {
    bytes.len() >= HEADER_LEN
        && bytes[0] == PRELUDE
        && bytes[1] == family.chain_id()
        && OpType::from_byte(bytes[2]).is_some()
}

pub fn is_penumbra_qr(bytes: &[u8]) -> bool {
    is_family_qr(bytes, ChainFamily::Penumbra)
}

pub fn is_zcash_qr(bytes: &[u8]) -> bool {
    is_family_qr(bytes, ChainFamily::Zcash)
}

pub fn is_cosmos_qr(bytes: &[u8]) -> bool {
    is_family_qr(bytes, ChainFamily::Cosmos)
}

/// A decoded viewing-key export of any family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewingKeyExport {
    Penumbra(penumbra::FvkExport),
    Zcash(zcash::FvkExport),
    Cosmos(cosmos::PubkeyExport),
}

impl ViewingKeyExport {
    pub fn decode(bytes: &[u8]) -> Result<Self, QrError> {
        let (family, _) = route(bytes)?;
        match family {
            ChainFamily::Penumbra => penumbra::FvkExport::decode(bytes).map(Self::Penumbra),
            ChainFamily::Zcash => zcash::FvkExport::decode(bytes).map(Self::Zcash),
            ChainFamily::Cosmos => cosmos::PubkeyExport::decode(bytes).map(Self::Cosmos),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Penumbra(e) => &e.label,
            Self::Zcash(e) => &e.label,
            Self::Cosmos(e) => &e.label,
        }
    }

    /// One entry per network the export carries key material for.
    pub fn viewing_keys(&self) -> Vec<NetworkViewingKey> {
        match self {
            Self::Penumbra(e) => e.viewing_keys(),
            Self::Zcash(e) => e.viewing_keys(),
            Self::Cosmos(e) => e.viewing_keys(),
        }
    }
}

// ── cursor helpers ──────────────────────────────────────────────────────────

pub(crate) fn write_header(out: &mut Vec<u8>, family: ChainFamily, op: OpType) {
    out.push(PRELUDE);
    out.push(family.chain_id());
    out.push(op as u8);
}

pub(crate) fn write_u8_str(
    out: &mut Vec<u8>,
    field: &'static str,
    s: &str,
) -> Result<(), QrError> {
    let len = checked_len(field, s.len(), u8::MAX as usize)?;
    out.push(len as u8);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

pub(crate) fn write_u16_bytes(
    out: &mut Vec<u8>,
    field: &'static str,
    bytes: &[u8],
) -> Result<(), QrError> {
    let len = checked_len(field, bytes.len(), u16::MAX as usize)?;
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

pub(crate) fn write_u32_bytes(
    out: &mut Vec<u8>,
    field: &'static str,
    bytes: &[u8],
) -> Result<(), QrError> {
    let len = checked_len(field, bytes.len(), u32::MAX as usize)?;
    out.extend_from_slice(&(len as u32).to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// u16 count followed by fixed-width items.
pub(crate) fn write_u16_list<const N: usize>(
    out: &mut Vec<u8>,
    field: &'static str,
    items: &[[u8; N]],
) -> Result<(), QrError> {
    let count = checked_len(field, items.len(), u16::MAX as usize)?;
    out.extend_from_slice(&(count as u16).to_le_bytes());
    for item in items {
        out.extend_from_slice(item);
    }
    Ok(())
}

fn checked_len(field: &'static str, len: usize, max: usize) -> Result<usize, QrError> {
    if len > max {
        return Err(QrError::FieldTooLong { field, len, max });
    }
    Ok(len)
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Validates the header and positions the cursor at the payload.
    pub(crate) fn open(bytes: &'a [u8], family: ChainFamily, op: OpType) -> Result<Self, QrError> {
        let mut r = Reader { buf: bytes, pos: 0 };
        let prelude = r.u8("prelude")?;
        if prelude != PRELUDE {
            return Err(QrError::WrongPrelude { got: prelude });
        }
        let chain = r.u8("chain id")?;
        if chain != family.chain_id() {
            return Err(QrError::WrongChain {
                got: chain,
                expected: family.chain_id(),
            });
        }
        let got = r.u8("op type")?;
        if got != op as u8 {
            return Err(QrError::WrongOpType {
                got,
                expected: op as u8,
            });
        }
        Ok(r)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, field: &'static str, n: usize) -> Result<&'a [u8], QrError> {
        if self.remaining() < n {
            return Err(QrError::Truncated {
                field,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn u8(&mut self, field: &'static str) -> Result<u8, QrError> {
        Ok(self.take(field, 1)?[0])
    }

    pub(crate) fn u16(&mut self, field: &'static str) -> Result<u16, QrError> {
        let b = self.take(field, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self, field: &'static str) -> Result<u32, QrError> {
        let b = self.take(field, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], QrError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(field, N)?);
        Ok(out)
    }

    pub(crate) fn flags(&mut self) -> Result<u8, QrError> {
        let flags = self.u8("flags")?;
        if flags & !KNOWN_FLAGS != 0 {
            return Err(QrError::InvalidFlags(flags));
        }
        Ok(flags)
    }

    pub(crate) fn u8_str(&mut self, field: &'static str) -> Result<String, QrError> {
        let len = self.u8(field)? as usize;
        utf8(field, self.take(field, len)?)
    }

    pub(crate) fn u16_str(&mut self, field: &'static str) -> Result<String, QrError> {
        let bytes = self.u16_bytes(field)?;
        utf8(field, &bytes)
    }

    pub(crate) fn u16_bytes(&mut self, field: &'static str) -> Result<Vec<u8>, QrError> {
        let len = self.u16(field)? as usize;
        Ok(self.take(field, len)?.to_vec())
    }

    pub(crate) fn u32_bytes(&mut self, field: &'static str) -> Result<Vec<u8>, QrError> {
        let len = self.u32(field)? as usize;
        Ok(self.take(field, len)?.to_vec())
    }

    pub(crate) fn u16_list<const N: usize>(
        &mut self,
        field: &'static str,
    ) -> Result<Vec<[u8; N]>, QrError> {
        let count = self.u16(field)? as usize;
        let needed = count * N;
        if self.remaining() < needed {
            return Err(QrError::Truncated {
                field,
                needed,
                remaining: self.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.array::<N>(field)?);
        }
        Ok(items)
    }

    /// Rejects payloads with bytes left over.
    pub(crate) fn finish(self) -> Result<(), QrError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(QrError::TrailingBytes(n)),
        }
    }
}

fn utf8(field: &'static str, bytes: &[u8]) -> Result<String, QrError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| QrError::InvalidUtf8 { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_reads_only_the_header() {
        let bytes = [PRELUDE, 0x04, 0x03];
        assert_eq!(route(&bytes).unwrap(), (ChainFamily::Zcash, OpType::Signatures));
        assert!(is_zcash_qr(&bytes));
        assert!(!is_penumbra_qr(&bytes));
        assert!(!is_cosmos_qr(&bytes));
    }

    #[test]
    fn route_rejects_bad_headers() {
        assert!(matches!(route(&[0x53, 0x03]), Err(QrError::Truncated { field: "header", .. })));
        assert_eq!(route(&[0x52, 0x03, 0x01]), Err(QrError::WrongPrelude { got: 0x52 }));
        assert_eq!(route(&[0x53, 0x09, 0x01]), Err(QrError::UnknownChain(0x09)));
        assert!(!is_cosmos_qr(&[0x53, 0x05, 0x07]));
    }

    #[test]
    fn wrong_op_message_names_both_bytes() {
        let err = Reader::open(&[PRELUDE, 0x03, 0x04], ChainFamily::Penumbra, OpType::Signatures)
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "wrong op type: got 0x04, expected 0x03");
    }

    #[test]
    fn reader_names_the_short_field() {
        let bytes = [PRELUDE, 0x03, 0x01, 0x00, 0x01, 0x00];
        let mut r = Reader::open(&bytes, ChainFamily::Penumbra, OpType::Export).unwrap();
        r.flags().unwrap();
        assert_eq!(
            r.u32("account index").err(),
            Some(QrError::Truncated {
                field: "account index",
                needed: 4,
                remaining: 2
            })
        );
    }

    #[test]
    fn oversized_label_is_refused() {
        let mut out = Vec::new();
        let label = "x".repeat(MAX_LABEL_LEN + 1);
        assert!(matches!(
            write_u8_str(&mut out, "label", &label),
            Err(QrError::FieldTooLong { field: "label", .. })
        ));
    }
}
