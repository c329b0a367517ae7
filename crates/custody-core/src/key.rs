//! Password-derived keys and their public prints.
//!
//! A `KeyPrint` stores the salt, the KDF cost and a SHA-256 digest of the
//! derived key. It is enough to check a password by re-deriving, never enough
//! to recover the key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{derive_key, generate_salt, KdfParams, DERIVED_KEY_LEN, SALT_LEN};
use crate::error::CustodyError;

/// 32-byte symmetric key. Zeroized on drop, never serialised.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Key([u8; DERIVED_KEY_LEN]);

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Key(..)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyPrint {
    #[serde(with = "crate::encoding::hex_array")]
    pub hash: [u8; 32],
    #[serde(with = "crate::encoding::hex_array")]
    pub salt: [u8; SALT_LEN],
    #[serde(default)]
    pub kdf: KdfParams,
}

impl Key {
    /// Derives a fresh key under a new random salt.
    pub fn create(password: &str, params: &KdfParams) -> Result<(Key, KeyPrint), CustodyError> {
        let salt = generate_salt();
        let derived = derive_key(password, &salt, params)?;
        let key = Key(*derived);
        let print = KeyPrint {
            hash: key.digest(),
            salt,
            kdf: *params,
        };
        Ok((key, print))
    }

    /// Re-derives the key behind `print`. `None` covers both a wrong password
    /// and an unusable print.
    pub fn recreate(password: &str, print: &KeyPrint) -> Option<Key> {
        let derived = match derive_key(password, &print.salt, &print.kdf) {
            Ok(derived) => derived,
            Err(err) => {
                debug!(error = %err, "key print could not be re-derived");
                return None;
            }
        };
        let key = Key(*derived);
        if bool::from(key.digest()[..].ct_eq(&print.hash[..])) {
            Some(key)
        } else {
            None
        }
    }

    pub(crate) fn bytes(&self) -> &[u8; DERIVED_KEY_LEN] {
        &self.0
    }

    fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.0).into()
    }
}

/// Off-thread variants: Argon2 is CPU bound and must not stall the runtime.
impl Key {
    pub async fn create_blocking(
        password: String,
        params: KdfParams,
    ) -> Result<(Key, KeyPrint), CustodyError> {
        let password = zeroize::Zeroizing::new(password);
        tokio::task::spawn_blocking(move || Key::create(&password, &params)).await?
    }

    pub async fn recreate_blocking(
        password: String,
        print: KeyPrint,
    ) -> Result<Option<Key>, CustodyError> {
        let password = zeroize::Zeroizing::new(password);
        Ok(tokio::task::spawn_blocking(move || Key::recreate(&password, &print)).await?)
    }
}
