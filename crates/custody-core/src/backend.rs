//! Cryptography-library seam.
//!
//! Network key derivation, effect hashing and signing live behind
//! `CustodyBackend`. The keyring and the authorization flow only ever hold a
//! `dyn CustodyBackend`, so a production wallet links its real per-network
//! libraries here. `ReferenceBackend` is a deterministic stand-in built from
//! HKDF, BLAKE3 and Ed25519 for tests and the CLI.

use std::fmt;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::network::{ChainFamily, Network};
use crate::qr::{self, cosmos, penumbra, zcash, OpType, RANDOMIZER_LEN, SIGNATURE_LEN};

/// What the wallet asks custody to authorize. Opaque bodies except for the
/// parts an effect hash and the signer need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionPlan {
    Penumbra {
        account_index: u32,
        body: Vec<u8>,
        spend_randomizers: Vec<[u8; RANDOMIZER_LEN]>,
        vote_randomizers: Vec<[u8; RANDOMIZER_LEN]>,
        summary: String,
    },
    Zcash {
        account_index: u32,
        body: Vec<u8>,
        orchard_alphas: Vec<[u8; RANDOMIZER_LEN]>,
        summary: String,
    },
    Cosmos {
        account_index: u32,
        network: Network,
        chain_id: String,
        sign_doc: Vec<u8>,
        summary: String,
    },
}

impl TransactionPlan {
    pub fn network(&self) -> Network {
        match self {
            Self::Penumbra { .. } => Network::Penumbra,
            Self::Zcash { .. } => Network::Zcash,
            Self::Cosmos { network, .. } => *network,
        }
    }

    pub fn account_index(&self) -> u32 {
        match self {
            Self::Penumbra { account_index, .. }
            | Self::Zcash { account_index, .. }
            | Self::Cosmos { account_index, .. } => *account_index,
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            Self::Penumbra { summary, .. }
            | Self::Zcash { summary, .. }
            | Self::Cosmos { summary, .. } => summary,
        }
    }
}

/// Digest of a plan's effects. Length depends on the network family.
#[derive(Clone, PartialEq, Eq)]
pub struct EffectHash(Vec<u8>);

impl EffectHash {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Constant-time comparison against a hash returned by a signer.
    pub fn matches(&self, other: &[u8]) -> bool {
        self.0.len() == other.len() && bool::from(self.0[..].ct_eq(other))
    }

    pub fn to_array<const N: usize>(&self) -> Result<[u8; N]> {
        self.0
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("effect hash is {} bytes, expected {N}", self.0.len()))
    }
}

impl fmt::Display for EffectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for EffectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EffectHash({self})")
    }
}

/// Signatures bound to one plan. Not `Clone`: consumed once by the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthorizationData {
    Penumbra {
        effect_hash: EffectHash,
        spend_auths: Vec<[u8; SIGNATURE_LEN]>,
        vote_auths: Vec<[u8; SIGNATURE_LEN]>,
    },
    Zcash {
        sighash: EffectHash,
        transparent: Vec<Vec<u8>>,
        orchard: Vec<[u8; SIGNATURE_LEN]>,
    },
    Cosmos {
        sign_doc_hash: EffectHash,
        signature: [u8; SIGNATURE_LEN],
        pubkey: Vec<u8>,
    },
}

impl AuthorizationData {
    pub fn effect_hash(&self) -> &EffectHash {
        match self {
            Self::Penumbra { effect_hash, .. } => effect_hash,
            Self::Zcash { sighash, .. } => sighash,
            Self::Cosmos { sign_doc_hash, .. } => sign_doc_hash,
        }
    }

    pub fn signature_count(&self) -> usize {
        match self {
            Self::Penumbra {
                spend_auths,
                vote_auths,
                ..
            } => spend_auths.len() + vote_auths.len(),
            Self::Zcash {
                transparent,
                orchard,
                ..
            } => transparent.len() + orchard.len(),
            Self::Cosmos { .. } => 1,
        }
    }
}

#[async_trait]
pub trait CustodyBackend: Send + Sync {
    /// Public viewing key for `network` from a seed phrase.
    async fn derive_viewing_key(&self, seed: &[u8], network: Network, account_index: u32)
        -> Result<Vec<u8>>;

    async fn derive_address(&self, viewing_key: &[u8], network: Network) -> Result<String>;

    /// Computed from public material only; air-gap vaults never hold a spend key.
    async fn effect_hash(&self, viewing_key: &[u8], plan: &TransactionPlan) -> Result<EffectHash>;

    async fn authorize(&self, seed: &[u8], plan: &TransactionPlan) -> Result<AuthorizationData>;
}

// ── reference backend ───────────────────────────────────────────────────────

const HKDF_SALT: &[u8] = b"custody-reference-v1";

#[derive(Debug, Clone, Default)]
pub struct ReferenceBackend;

impl ReferenceBackend {
    pub fn new() -> Self {
        Self
    }

    fn spend_key(seed: &[u8], network: Network, account_index: u32) -> Result<SigningKey> {
        let mut info = Vec::with_capacity(32);
        info.extend_from_slice(b"spend\x00");
        info.extend_from_slice(network.as_str().as_bytes());
        info.push(0);
        info.extend_from_slice(&account_index.to_le_bytes());
        let mut okm = Zeroizing::new([0u8; 32]);
        Hkdf::<Sha256>::new(Some(HKDF_SALT), seed)
            .expand(&info, &mut *okm)
            .map_err(|e| anyhow!("hkdf expand: {e}"))?;
        Ok(SigningKey::from_bytes(&okm))
    }

    fn viewing_key_for(signing: &SigningKey, network: Network) -> Result<Vec<u8>> {
        let vk = signing.verifying_key().to_bytes();
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &vk);
        let key = match network.family() {
            ChainFamily::Penumbra => {
                let mut nk = [0u8; 32];
                hk.expand(b"penumbra-nk", &mut nk)
                    .map_err(|e| anyhow!("hkdf expand: {e}"))?;
                [vk.as_slice(), nk.as_slice()].concat()
            }
            ChainFamily::Zcash => {
                let mut rest = [0u8; 64];
                hk.expand(b"orchard-fvk", &mut rest)
                    .map_err(|e| anyhow!("hkdf expand: {e}"))?;
                [vk.as_slice(), rest.as_slice()].concat()
            }
            ChainFamily::Cosmos => [&[0x02u8][..], vk.as_slice()].concat(),
        };
        Ok(key)
    }

    /// Length-prefixed transcript of everything the signatures commit to.
    fn transcript(plan: &TransactionPlan) -> Vec<u8> {
        fn put(out: &mut Vec<u8>, bytes: &[u8]) {
            out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
            out.extend_from_slice(bytes);
        }
        let mut out = Vec::new();
        put(&mut out, plan.network().as_str().as_bytes());
        out.extend_from_slice(&plan.account_index().to_le_bytes());
        match plan {
            TransactionPlan::Penumbra {
                body,
                spend_randomizers,
                vote_randomizers,
                ..
            } => {
                put(&mut out, body);
                put(&mut out, &spend_randomizers.concat());
                put(&mut out, &vote_randomizers.concat());
            }
            TransactionPlan::Zcash {
                body,
                orchard_alphas,
                ..
            } => {
                put(&mut out, body);
                put(&mut out, &orchard_alphas.concat());
            }
            TransactionPlan::Cosmos {
                chain_id, sign_doc, ..
            } => {
                put(&mut out, chain_id.as_bytes());
                put(&mut out, sign_doc);
            }
        }
        out
    }

    fn compute_effect_hash(viewing_key: &[u8], plan: &TransactionPlan) -> EffectHash {
        let network = plan.network();
        match network.family() {
            ChainFamily::Cosmos => match plan {
                TransactionPlan::Cosmos { sign_doc, .. } => {
                    EffectHash(Sha256::digest(sign_doc).to_vec())
                }
                _ => EffectHash(Sha256::digest(Self::transcript(plan)).to_vec()),
            },
            ChainFamily::Penumbra | ChainFamily::Zcash => {
                let key = blake3::derive_key("custody reference effect hash v1", viewing_key);
                let mut hasher = blake3::Hasher::new_keyed(&key);
                hasher.update(&Self::transcript(plan));
                let mut out = vec![0u8; network.effect_hash_len()];
                hasher.finalize_xof().fill(&mut out);
                EffectHash(out)
            }
        }
    }

    fn sign_bound(signing: &SigningKey, hash: &[u8], randomizer: &[u8]) -> [u8; SIGNATURE_LEN] {
        let mut msg = Vec::with_capacity(hash.len() + randomizer.len());
        msg.extend_from_slice(hash);
        msg.extend_from_slice(randomizer);
        signing.sign(&msg).to_bytes()
    }

    fn address_for(viewing_key: &[u8], network: Network) -> String {
        let prefix = match network {
            Network::Penumbra => "penumbra",
            Network::Zcash => "u",
            Network::Osmosis => "osmo",
            Network::Noble => "noble",
            Network::Nomic => "nomic",
            Network::Celestia => "celestia",
            Network::CosmosHub => "cosmos",
        };
        let digest = blake3::hash(viewing_key);
        format!("{prefix}1{}", hex::encode(&digest.as_bytes()[..20]))
    }

    /// Plays the signing device: the viewing-key export it would display for
    /// `network`.
    pub fn export_as_device(
        &self,
        seed: &[u8],
        network: Network,
        account_index: u32,
        label: &str,
    ) -> Result<Vec<u8>> {
        let key = Self::spend_key(seed, network, account_index)?;
        let vk = Self::viewing_key_for(&key, network)?;
        let address = Self::address_for(&vk, network);
        let code = match network.family() {
            ChainFamily::Penumbra => penumbra::FvkExport {
                mainnet: true,
                account_index,
                label: label.to_string(),
                fvk: Some(vk.as_slice().try_into().context("penumbra fvk length")?),
                address: Some(address),
            }
            .encode()?,
            ChainFamily::Zcash => zcash::FvkExport {
                mainnet: true,
                account_index,
                label: label.to_string(),
                orchard_fvk: Some(vk.as_slice().try_into().context("orchard fvk length")?),
                transparent_xpub: None,
                address: Some(address),
            }
            .encode()?,
            ChainFamily::Cosmos => cosmos::PubkeyExport {
                mainnet: true,
                account_index,
                label: label.to_string(),
                pubkey: Some(vk.as_slice().try_into().context("cosmos pubkey length")?),
                addresses: vec![(network, address)],
            }
            .encode()?,
        };
        Ok(code)
    }

    /// Plays the signing device: answers a sign-request code with a
    /// signature code, signing whatever hash the request carries.
    pub fn sign_as_device(&self, seed: &[u8], request: &[u8]) -> Result<Vec<u8>> {
        let (family, op) = qr::route(request)?;
        if op != OpType::SignRequest {
            bail!("expected a sign request, got {op:?}");
        }
        let response = match family {
            ChainFamily::Penumbra => {
                let req = penumbra::SignRequest::decode(request)?;
                let key = Self::spend_key(seed, Network::Penumbra, req.account_index)?;
                penumbra::Signatures {
                    effect_hash: req.effect_hash,
                    spend_auths: req
                        .spend_randomizers
                        .iter()
                        .map(|r| Self::sign_bound(&key, &req.effect_hash, r))
                        .collect(),
                    vote_auths: req
                        .vote_randomizers
                        .iter()
                        .map(|r| Self::sign_bound(&key, &req.effect_hash, r))
                        .collect(),
                }
                .encode()?
            }
            ChainFamily::Zcash => {
                let req = zcash::SignRequest::decode(request)?;
                let key = Self::spend_key(seed, Network::Zcash, req.account_index)?;
                zcash::Signatures {
                    sighash: req.sighash,
                    transparent: Vec::new(),
                    orchard: req
                        .orchard_alphas
                        .iter()
                        .map(|a| Self::sign_bound(&key, &req.sighash, a))
                        .collect(),
                }
                .encode()?
            }
            ChainFamily::Cosmos => {
                let req = cosmos::SignRequest::decode(request)?;
                let key = Self::spend_key(seed, req.network, req.account_index)?;
                let pubkey = Self::viewing_key_for(&key, req.network)?;
                cosmos::Signatures {
                    sign_doc_hash: req.sign_doc_hash,
                    signature: Self::sign_bound(&key, &req.sign_doc_hash, &[]),
                    pubkey: pubkey
                        .as_slice()
                        .try_into()
                        .context("cosmos pubkey length")?,
                }
                .encode()?
            }
        };
        Ok(response)
    }
}

#[async_trait]
impl CustodyBackend for ReferenceBackend {
    async fn derive_viewing_key(
        &self,
        seed: &[u8],
        network: Network,
        account_index: u32,
    ) -> Result<Vec<u8>> {
        let key = Self::spend_key(seed, network, account_index)?;
        Self::viewing_key_for(&key, network)
    }

    async fn derive_address(&self, viewing_key: &[u8], network: Network) -> Result<String> {
        Ok(Self::address_for(viewing_key, network))
    }

    async fn effect_hash(&self, viewing_key: &[u8], plan: &TransactionPlan) -> Result<EffectHash> {
        if viewing_key.is_empty() {
            bail!("empty viewing key");
        }
        Ok(Self::compute_effect_hash(viewing_key, plan))
    }

    async fn authorize(&self, seed: &[u8], plan: &TransactionPlan) -> Result<AuthorizationData> {
        let network = plan.network();
        let key = Self::spend_key(seed, network, plan.account_index())?;
        let viewing_key = Self::viewing_key_for(&key, network)?;
        let hash = Self::compute_effect_hash(&viewing_key, plan);
        let data = match plan {
            TransactionPlan::Penumbra {
                spend_randomizers,
                vote_randomizers,
                ..
            } => AuthorizationData::Penumbra {
                spend_auths: spend_randomizers
                    .iter()
                    .map(|r| Self::sign_bound(&key, hash.as_bytes(), r))
                    .collect(),
                vote_auths: vote_randomizers
                    .iter()
                    .map(|r| Self::sign_bound(&key, hash.as_bytes(), r))
                    .collect(),
                effect_hash: hash,
            },
            TransactionPlan::Zcash { orchard_alphas, .. } => AuthorizationData::Zcash {
                transparent: Vec::new(),
                orchard: orchard_alphas
                    .iter()
                    .map(|a| Self::sign_bound(&key, hash.as_bytes(), a))
                    .collect(),
                sighash: hash,
            },
            TransactionPlan::Cosmos { .. } => AuthorizationData::Cosmos {
                signature: Self::sign_bound(&key, hash.as_bytes(), &[]),
                pubkey: viewing_key,
                sign_doc_hash: hash,
            },
        };
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    const SEED: &[u8] = b"abandon ability able about above absent absorb abstract";

    fn zcash_plan() -> TransactionPlan {
        TransactionPlan::Zcash {
            account_index: 0,
            body: b"unsigned tx".to_vec(),
            orchard_alphas: vec![[1; 32], [2; 32]],
            summary: "0.1 ZEC".into(),
        }
    }

    #[tokio::test]
    async fn viewing_key_lengths_follow_the_wire() {
        let backend = ReferenceBackend::new();
        let p = backend.derive_viewing_key(SEED, Network::Penumbra, 0).await.unwrap();
        let z = backend.derive_viewing_key(SEED, Network::Zcash, 0).await.unwrap();
        let c = backend.derive_viewing_key(SEED, Network::Osmosis, 0).await.unwrap();
        assert_eq!(p.len(), penumbra::FVK_LEN);
        assert_eq!(z.len(), zcash::ORCHARD_FVK_LEN);
        assert_eq!(c.len(), cosmos::PUBKEY_LEN);
    }

    #[tokio::test]
    async fn local_signing_matches_public_effect_hash() {
        let backend = ReferenceBackend::new();
        let plan = zcash_plan();
        let vk = backend.derive_viewing_key(SEED, Network::Zcash, 0).await.unwrap();
        let public = backend.effect_hash(&vk, &plan).await.unwrap();
        let auth = backend.authorize(SEED, &plan).await.unwrap();
        assert!(public.matches(auth.effect_hash().as_bytes()));
        assert_eq!(auth.signature_count(), 2);

        let verifying = VerifyingKey::from_bytes(vk[..32].try_into().unwrap()).unwrap();
        if let AuthorizationData::Zcash { orchard, .. } = auth {
            let msg = [public.as_bytes(), &[1u8; 32][..]].concat();
            assert!(verifying
                .verify(&msg, &Signature::from_bytes(&orchard[0]))
                .is_ok());
        } else {
            panic!("wrong variant");
        }
    }

    #[tokio::test]
    async fn effect_hash_binds_the_plan() {
        let backend = ReferenceBackend::new();
        let vk = backend.derive_viewing_key(SEED, Network::Penumbra, 0).await.unwrap();
        let plan = TransactionPlan::Penumbra {
            account_index: 0,
            body: b"a".to_vec(),
            spend_randomizers: vec![],
            vote_randomizers: vec![],
            summary: String::new(),
        };
        let mut other = plan.clone();
        if let TransactionPlan::Penumbra { body, .. } = &mut other {
            body.push(b'b');
        }
        let a = backend.effect_hash(&vk, &plan).await.unwrap();
        let b = backend.effect_hash(&vk, &other).await.unwrap();
        assert_eq!(a.as_bytes().len(), 64);
        assert!(!a.matches(b.as_bytes()));
    }

    #[test]
    fn device_echoes_request_hash() {
        let req = zcash::SignRequest {
            account_index: 0,
            sighash: [9; 32],
            orchard_alphas: vec![[1; 32]],
            summary: String::new(),
        };
        let bytes = ReferenceBackend::new()
            .sign_as_device(SEED, &req.encode().unwrap())
            .unwrap();
        let sigs = zcash::Signatures::decode(&bytes).unwrap();
        assert_eq!(sigs.sighash, [9; 32]);
        assert_eq!(sigs.orchard.len(), 1);
    }

    #[tokio::test]
    async fn device_export_matches_derived_keys() {
        let backend = ReferenceBackend::new();
        for network in [Network::Penumbra, Network::Zcash, Network::Noble] {
            let code = backend.export_as_device(SEED, network, 0, "card").unwrap();
            let keys = qr::ViewingKeyExport::decode(&code).unwrap().viewing_keys();
            assert_eq!(keys.len(), 1);
            let vk = backend.derive_viewing_key(SEED, network, 0).await.unwrap();
            assert_eq!(keys[0].viewing_key, vk);
            assert_eq!(
                keys[0].address.as_deref(),
                Some(backend.derive_address(&vk, network).await.unwrap().as_str())
            );
        }
    }
}
