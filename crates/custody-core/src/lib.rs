//! custody-core: encrypted credential vault and air-gap authorization
//!
//! # Storage
//! Secrets (recovery phrases, signing-device exports) are sealed with
//! XChaCha20-Poly1305 under a key derived from the user password via
//! Argon2id. Only a `KeyPrint` of that key is persisted. Non-secret vault
//! attributes travel in plaintext boxes so every record keeps one shape.
//!
//! # Authorization
//! Local vaults sign while the user reviews the plan. Air-gap vaults send the
//! plan to a separate device as a QR code and accept the scanned response
//! only if it signs the effect hash computed here from the viewing key.

pub mod authorization;
pub mod backend;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod key;
pub mod keyring;
pub mod network;
pub mod paths;
pub mod qr;
pub mod sealed_box;
pub mod session;
pub mod settings;
pub mod storage;
pub mod vault;

pub use authorization::{AuthorizationOutcome, AuthorizationState, Authorizer, UiRequest, UserChoice};
pub use backend::{AuthorizationData, CustodyBackend, EffectHash, ReferenceBackend, TransactionPlan};
pub use error::CustodyError;
pub use keyring::{Keyring, KeyringState, NetworkWallet};
pub use network::Network;
pub use session::SessionKey;
pub use settings::CustodySettings;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use vault::{AirgapImport, KeyInfo, Vault, VaultKind};
