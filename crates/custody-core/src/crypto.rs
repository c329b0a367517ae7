use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CustodyError;

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 65536; // 64MB
pub const KDF_PARALLELISM: u32 = 4;
pub const DERIVED_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const SALT_LEN: usize = 32;

/// Argon2id cost parameters. Stored next to every key print so a key can be
/// re-derived with the exact parameters it was created under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: KDF_MEMORY_COST,
            time_cost: KDF_TIME_COST,
            parallelism: KDF_PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Minimum Argon2 cost. Only for tests and throwaway stores.
    pub fn fast() -> Self {
        Self {
            memory_cost: 8,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

pub fn derive_key(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>, CustodyError> {
    let params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(DERIVED_KEY_LEN),
    )
    .map_err(|e| CustodyError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    argon
        .hash_password_into(password.as_bytes(), salt, &mut *key)
        .map_err(|e| CustodyError::KeyDerivation(format!("argon2 derive: {e}")))?;
    Ok(key)
}

pub fn encrypt(
    key: &[u8; DERIVED_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, CustodyError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| CustodyError::EncryptionFailed)
}

/// Fails with the same error for a wrong key and for tampered bytes.
pub fn decrypt(
    key: &[u8; DERIVED_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CustodyError::DecryptionFailed)
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    // The all-zero nonce marks plaintext boxes and is never handed out.
    if nonce.iter().all(|b| *b == 0) {
        nonce[0] = 1;
    }
    nonce
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic_per_salt() {
        let salt = generate_salt();
        let a = derive_key("pw", &salt, &KdfParams::fast()).unwrap();
        let b = derive_key("pw", &salt, &KdfParams::fast()).unwrap();
        let c = derive_key("pw", &generate_salt(), &KdfParams::fast()).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let salt = generate_salt();
        let k1 = derive_key("one", &salt, &KdfParams::fast()).unwrap();
        let k2 = derive_key("two", &salt, &KdfParams::fast()).unwrap();
        let nonce = generate_nonce();
        let ct = encrypt(&k1, &nonce, b"secret").unwrap();
        assert!(matches!(
            decrypt(&k2, &nonce, &ct),
            Err(CustodyError::DecryptionFailed)
        ));
        assert_eq!(decrypt(&k1, &nonce, &ct).unwrap().as_slice(), b"secret");
    }
}
