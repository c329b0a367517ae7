//! Authenticated-encryption envelope.
//!
//! A box whose nonce is all zeroes is not encrypted: its `cipher_text` holds
//! UTF-8 plaintext. The convention lets non-secret metadata share the on-disk
//! shape of real secrets. Never build a plaintext box from secret data.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::crypto::{decrypt, encrypt, generate_nonce, NONCE_LEN};
use crate::error::CustodyError;
use crate::key::Key;

const PLAINTEXT_NONCE: [u8; NONCE_LEN] = [0u8; NONCE_LEN];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub nonce: [u8; NONCE_LEN],
    pub cipher_text: Vec<u8>,
}

impl SealedBox {
    pub fn seal(key: &Key, plaintext: &[u8]) -> Result<Self, CustodyError> {
        let nonce = generate_nonce();
        let cipher_text = encrypt(key.bytes(), &nonce, plaintext)?;
        Ok(Self { nonce, cipher_text })
    }

    /// Plaintext boxes never unseal.
    pub fn unseal(&self, key: &Key) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
        if !self.is_encrypted() {
            return Err(CustodyError::DecryptionFailed);
        }
        decrypt(key.bytes(), &self.nonce, &self.cipher_text)
    }

    pub fn from_plaintext(text: &str) -> Self {
        Self {
            nonce: PLAINTEXT_NONCE,
            cipher_text: text.as_bytes().to_vec(),
        }
    }

    /// `None` when the box is actually encrypted, so any box can be checked.
    pub fn to_plaintext(&self) -> Option<String> {
        if self.is_encrypted() {
            return None;
        }
        String::from_utf8(self.cipher_text.clone()).ok()
    }

    pub fn is_encrypted(&self) -> bool {
        self.nonce != PLAINTEXT_NONCE
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SealedBoxRepr {
    nonce: String,
    cipher_text: String,
}

impl Serialize for SealedBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SealedBoxRepr {
            nonce: general_purpose::STANDARD.encode(self.nonce),
            cipher_text: general_purpose::STANDARD.encode(&self.cipher_text),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SealedBox {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let repr = SealedBoxRepr::deserialize(deserializer)?;
        let nonce = general_purpose::STANDARD
            .decode(&repr.nonce)
            .map_err(|e| D::Error::custom(format!("decode nonce: {e}")))?;
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| D::Error::custom("nonce length invalid"))?;
        let cipher_text = general_purpose::STANDARD
            .decode(&repr.cipher_text)
            .map_err(|e| D::Error::custom(format!("decode cipher text: {e}")))?;
        Ok(Self { nonce, cipher_text })
    }
}
