use thiserror::Error;

use crate::network::Network;
use crate::qr::QrError;
use crate::storage::StorageError;
use crate::vault::VaultKind;

#[derive(Debug, Error)]
pub enum CustodyError {
    /// Deliberately identical for a wrong password and a corrupt key print.
    #[error("incorrect password")]
    WrongPassword,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("vault not found: {0}")]
    VaultNotFound(String),

    #[error("the last remaining vault cannot be deleted")]
    LastVaultDeletionRefused,

    #[error("malformed QR code: {0}")]
    MalformedQr(#[from] QrError),

    #[error("signature response does not match the displayed transaction")]
    EffectHashMismatch { expected: String, actual: String },

    #[error("password change aborted: vault {vault_id} could not be decrypted")]
    MigrationAborted { vault_id: String },

    #[error("keyring is locked")]
    Locked,

    #[error("a password must be set first")]
    PasswordRequired,

    #[error("a password is already set")]
    PasswordAlreadySet,

    #[error("password must not be empty")]
    EmptyPassword,

    #[error("vault {vault_id} is not a {expected} vault")]
    WrongVaultType { vault_id: String, expected: VaultKind },

    #[error("vault has no viewing key for {0}")]
    UnsupportedNetwork(Network),

    #[error("vault has no {network} viewing key for account {account_index}")]
    UnsupportedAccount { network: Network, account_index: u32 },

    #[error("no vault is selected")]
    NoVaultSelected,

    #[error("expected {expected} {field} signatures, got {actual}")]
    SignatureCountMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("signature response came from a different key than the one imported")]
    SignerKeyMismatch,

    #[error("air-gap import carries no viewing keys")]
    EmptyImport,

    #[error("corrupt vault record: {0}")]
    CorruptRecord(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("signing backend error: {0}")]
    Backend(#[source] anyhow::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl CustodyError {
    /// Message safe to show to the end user. Password and decryption failures
    /// collapse into one generic message.
    pub fn user_message(&self) -> String {
        match self {
            Self::WrongPassword | Self::DecryptionFailed | Self::KeyDerivation(_) => {
                "incorrect password".to_string()
            }
            Self::EffectHashMismatch { .. } => {
                "the signing device approved a different transaction; nothing was sent".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for CustodyError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
