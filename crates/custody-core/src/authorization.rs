//! Authorization orchestrator.
//!
//! One request per plan: `Pending -> {AwaitingApproval | AwaitingAirgapScan}
//! -> {Approved | Denied | Failed}`. The UI is reached only through
//! `UiRequest` messages carrying a oneshot reply. A dropped reply, a closed
//! channel, a cancel or a timeout all resolve to `Denied`, never to a wait
//! that outlives the UI.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::backend::{AuthorizationData, CustodyBackend, EffectHash, TransactionPlan};
use crate::error::CustodyError;
use crate::keyring::Keyring;
use crate::network::ChainFamily;
use crate::qr::{self, cosmos, penumbra, zcash};
use crate::settings::AuthorizationSettings;
use crate::vault::{AirgapInsensitive, Custody, Vault};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserChoice {
    Approved,
    Denied,
}

/// Messages to the UI. Dropping `reply` counts as a denial.
#[derive(Debug)]
pub enum UiRequest {
    Approve {
        plan: TransactionPlan,
        reply: oneshot::Sender<UserChoice>,
    },
    /// Show `qr`, then answer with the scanned response or `None` if the
    /// scanner was closed.
    DisplayAndScan {
        qr: Vec<u8>,
        summary: String,
        reply: oneshot::Sender<Option<Vec<u8>>>,
    },
    RequestPassword {
        attempt: u32,
        reply: oneshot::Sender<Option<String>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    Pending,
    AwaitingPassword,
    AwaitingApproval,
    AwaitingAirgapScan,
    Approved,
    Denied,
    Failed,
}

impl AuthorizationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Denied | Self::Failed)
    }
}

#[derive(Debug)]
pub enum AuthorizationOutcome {
    Approved(AuthorizationData),
    Denied,
    Failed(CustodyError),
}

impl AuthorizationOutcome {
    pub fn state(&self) -> AuthorizationState {
        match self {
            Self::Approved(_) => AuthorizationState::Approved,
            Self::Denied => AuthorizationState::Denied,
            Self::Failed(_) => AuthorizationState::Failed,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved(_))
    }
}

/// A running request. Cancel it, watch its state, or await its outcome.
/// Dropping the handle cancels the request.
pub struct AuthorizationHandle {
    state: watch::Receiver<AuthorizationState>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<AuthorizationOutcome>,
}

impl AuthorizationHandle {
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn state(&self) -> watch::Receiver<AuthorizationState> {
        self.state.clone()
    }

    pub async fn outcome(self) -> AuthorizationOutcome {
        let Self { task, cancel, .. } = self;
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(err) => AuthorizationOutcome::Failed(err.into()),
        };
        drop(cancel);
        outcome
    }
}

enum Step {
    Continue,
    Stop(AuthorizationOutcome),
}

#[derive(Clone)]
pub struct Authorizer {
    keyring: Arc<Keyring>,
    backend: Arc<dyn CustodyBackend>,
    ui: mpsc::Sender<UiRequest>,
    settings: AuthorizationSettings,
}

impl Authorizer {
    pub fn new(
        keyring: Arc<Keyring>,
        backend: Arc<dyn CustodyBackend>,
        ui: mpsc::Sender<UiRequest>,
        settings: AuthorizationSettings,
    ) -> Self {
        Self {
            keyring,
            backend,
            ui,
            settings,
        }
    }

    /// Runs the request on its own task.
    pub fn spawn(&self, plan: TransactionPlan) -> AuthorizationHandle {
        let (state_tx, state_rx) = watch::channel(AuthorizationState::Pending);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let this = self.clone();
        let task = tokio::spawn(async move { this.run(plan, cancel_rx, state_tx).await });
        AuthorizationHandle {
            state: state_rx,
            cancel: cancel_tx,
            task,
        }
    }

    /// Runs the request inline, without cancellation.
    pub async fn authorize(&self, plan: TransactionPlan) -> AuthorizationOutcome {
        let (state_tx, _state_rx) = watch::channel(AuthorizationState::Pending);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.run(plan, cancel_rx, state_tx).await
    }

    async fn run(
        &self,
        plan: TransactionPlan,
        mut cancel: watch::Receiver<bool>,
        state: watch::Sender<AuthorizationState>,
    ) -> AuthorizationOutcome {
        let network = plan.network();
        info!(%network, "authorization requested");

        let outcome = match self.keyring.selected_vault().await {
            Err(err) => AuthorizationOutcome::Failed(err),
            Ok(vault) => match &vault.custody {
                Custody::Mnemonic(_) => self.local(&vault, plan, &mut cancel, &state).await,
                Custody::AirgapSigner(airgap) => {
                    self.airgap(airgap, plan, &mut cancel, &state).await
                }
            },
        };

        transition(&state, outcome.state());
        match &outcome {
            AuthorizationOutcome::Failed(err) => warn!(%network, error = %err, "authorization failed"),
            other => info!(%network, outcome = ?other.state(), "authorization finished"),
        }
        outcome
    }

    // ── local custody ───────────────────────────────────────────────────────

    async fn local(
        &self,
        vault: &Vault,
        plan: TransactionPlan,
        cancel: &mut watch::Receiver<bool>,
        state: &watch::Sender<AuthorizationState>,
    ) -> AuthorizationOutcome {
        if let Step::Stop(outcome) = self.ensure_unlocked(cancel, state).await {
            return outcome;
        }
        let seed = match self.keyring.get_mnemonic(&vault.id).await {
            Ok(seed) => seed,
            Err(err) => return AuthorizationOutcome::Failed(err),
        };

        transition(state, AuthorizationState::AwaitingApproval);
        let approval_timeout = self.settings.approval_timeout_secs.map(Duration::from_secs);
        let signing = self.backend.authorize(seed.as_bytes(), &plan);
        let approval = self.ask_approval(plan.clone(), cancel, approval_timeout);
        let (signed, choice) = tokio::join!(signing, approval);
        drop(seed);

        match (choice, signed) {
            (UserChoice::Denied, _) => AuthorizationOutcome::Denied,
            (UserChoice::Approved, Err(err)) => AuthorizationOutcome::Failed(CustodyError::Backend(err)),
            (UserChoice::Approved, Ok(data)) => AuthorizationOutcome::Approved(data),
        }
    }

    async fn ensure_unlocked(
        &self,
        cancel: &mut watch::Receiver<bool>,
        state: &watch::Sender<AuthorizationState>,
    ) -> Step {
        if self.keyring.session().is_unlocked() {
            return Step::Continue;
        }
        transition(state, AuthorizationState::AwaitingPassword);
        for attempt in 1..=self.settings.max_password_attempts {
            let (reply, rx) = oneshot::channel();
            let request = UiRequest::RequestPassword { attempt, reply };
            let Some(password) = self.exchange(request, rx, cancel, None).await.flatten() else {
                return Step::Stop(AuthorizationOutcome::Denied);
            };
            let password = Zeroizing::new(password);
            match self.keyring.unlock(&password).await {
                Ok(()) => return Step::Continue,
                Err(CustodyError::WrongPassword) => {
                    info!(attempt, "password prompt rejected");
                }
                Err(err) => return Step::Stop(AuthorizationOutcome::Failed(err)),
            }
        }
        Step::Stop(AuthorizationOutcome::Failed(CustodyError::WrongPassword))
    }

    async fn ask_approval(
        &self,
        plan: TransactionPlan,
        cancel: &mut watch::Receiver<bool>,
        timeout: Option<Duration>,
    ) -> UserChoice {
        let (reply, rx) = oneshot::channel();
        self.exchange(UiRequest::Approve { plan, reply }, rx, cancel, timeout)
            .await
            .unwrap_or(UserChoice::Denied)
    }

    // ── air-gap custody ─────────────────────────────────────────────────────

    async fn airgap(
        &self,
        airgap: &AirgapInsensitive,
        plan: TransactionPlan,
        cancel: &mut watch::Receiver<bool>,
        state: &watch::Sender<AuthorizationState>,
    ) -> AuthorizationOutcome {
        let network = plan.network();
        let account_index = plan.account_index();
        if airgap.viewing_key(network).is_none() {
            return AuthorizationOutcome::Failed(CustodyError::UnsupportedNetwork(network));
        }
        let Some(viewing) = airgap.account_key(network, account_index) else {
            return AuthorizationOutcome::Failed(CustodyError::UnsupportedAccount {
                network,
                account_index,
            });
        };
        let hash = match self.backend.effect_hash(&viewing.viewing_key, &plan).await {
            Ok(hash) if hash.as_bytes().len() == network.effect_hash_len() => hash,
            Ok(hash) => {
                return AuthorizationOutcome::Failed(CustodyError::Backend(anyhow::anyhow!(
                    "effect hash is {} bytes, expected {}",
                    hash.as_bytes().len(),
                    network.effect_hash_len()
                )))
            }
            Err(err) => return AuthorizationOutcome::Failed(CustodyError::Backend(err)),
        };
        let request = match encode_sign_request(&plan, &hash) {
            Ok(request) => request,
            Err(err) => return AuthorizationOutcome::Failed(err),
        };

        transition(state, AuthorizationState::AwaitingAirgapScan);
        let scan_timeout = self.settings.scan_timeout_secs.map(Duration::from_secs);
        let (reply, rx) = oneshot::channel();
        let display = UiRequest::DisplayAndScan {
            qr: request,
            summary: plan.summary().to_string(),
            reply,
        };
        let Some(scanned) = self.exchange(display, rx, cancel, scan_timeout).await.flatten() else {
            return AuthorizationOutcome::Denied;
        };

        match verify_response(&plan, &hash, &viewing.viewing_key, &scanned) {
            Ok(data) => AuthorizationOutcome::Approved(data),
            Err(err) => {
                if let CustodyError::EffectHashMismatch { expected, actual } = &err {
                    warn!(%network, %expected, %actual, "signer returned a different effect hash");
                }
                AuthorizationOutcome::Failed(err)
            }
        }
    }

    /// Sends `request` and waits for its reply. `None` on a closed UI, a
    /// dropped reply, cancellation or timeout.
    async fn exchange<T>(
        &self,
        request: UiRequest,
        rx: oneshot::Receiver<T>,
        cancel: &mut watch::Receiver<bool>,
        timeout: Option<Duration>,
    ) -> Option<T> {
        if self.ui.send(request).await.is_err() {
            warn!("ui channel closed");
            return None;
        }
        let wait = async {
            tokio::select! {
                reply = rx => reply.ok(),
                _ = cancelled(cancel) => None,
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.ok().flatten(),
            None => wait.await,
        }
    }
}

/// Resolves on an explicit cancel or once every cancel sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

fn transition(state: &watch::Sender<AuthorizationState>, next: AuthorizationState) {
    let prev = state.send_replace(next);
    if prev != next {
        info!(from = ?prev, to = ?next, "authorization state");
    }
}

fn hash_array<const N: usize>(hash: &EffectHash) -> Result<[u8; N], CustodyError> {
    hash.to_array::<N>().map_err(CustodyError::Backend)
}

fn encode_sign_request(plan: &TransactionPlan, hash: &EffectHash) -> Result<Vec<u8>, CustodyError> {
    let bytes = match plan {
        TransactionPlan::Penumbra {
            account_index,
            body,
            spend_randomizers,
            vote_randomizers,
            summary,
        } => penumbra::SignRequest {
            account_index: *account_index,
            effect_hash: hash_array(hash)?,
            spend_randomizers: spend_randomizers.clone(),
            vote_randomizers: vote_randomizers.clone(),
            plan: body.clone(),
            summary: summary.clone(),
        }
        .encode()?,
        TransactionPlan::Zcash {
            account_index,
            orchard_alphas,
            summary,
            ..
        } => zcash::SignRequest {
            account_index: *account_index,
            sighash: hash_array(hash)?,
            orchard_alphas: orchard_alphas.clone(),
            summary: summary.clone(),
        }
        .encode()?,
        TransactionPlan::Cosmos {
            account_index,
            network,
            chain_id,
            sign_doc,
            summary,
        } => cosmos::SignRequest {
            account_index: *account_index,
            network: *network,
            chain_id: chain_id.clone(),
            sign_doc_hash: hash_array(hash)?,
            sign_doc: sign_doc.clone(),
            summary: summary.clone(),
        }
        .encode()?,
    };
    Ok(bytes)
}

fn check_count(field: &'static str, expected: usize, actual: usize) -> Result<(), CustodyError> {
    if expected != actual {
        return Err(CustodyError::SignatureCountMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_hash(expected: &EffectHash, bound: &[u8]) -> Result<(), CustodyError> {
    if !expected.matches(bound) {
        return Err(CustodyError::EffectHashMismatch {
            expected: expected.to_string(),
            actual: hex::encode(bound),
        });
    }
    Ok(())
}

/// Decodes a scanned response and accepts it only if it signs exactly
/// `expected` with the expected number of signatures.
pub fn verify_response(
    plan: &TransactionPlan,
    expected: &EffectHash,
    viewing_key: &[u8],
    scanned: &[u8],
) -> Result<AuthorizationData, CustodyError> {
    let (family, _) = qr::route(scanned)?;
    let wanted = plan.network().family();
    if family != wanted {
        return Err(qr::QrError::WrongChain {
            got: family.chain_id(),
            expected: wanted.chain_id(),
        }
        .into());
    }
    let data = match (family, plan) {
        (
            ChainFamily::Penumbra,
            TransactionPlan::Penumbra {
                spend_randomizers,
                vote_randomizers,
                ..
            },
        ) => {
            let sigs = penumbra::Signatures::decode(scanned)?;
            check_hash(expected, &sigs.effect_hash)?;
            check_count("spend", spend_randomizers.len(), sigs.spend_auths.len())?;
            check_count("vote", vote_randomizers.len(), sigs.vote_auths.len())?;
            AuthorizationData::Penumbra {
                effect_hash: EffectHash::new(sigs.effect_hash.to_vec()),
                spend_auths: sigs.spend_auths,
                vote_auths: sigs.vote_auths,
            }
        }
        (ChainFamily::Zcash, TransactionPlan::Zcash { orchard_alphas, .. }) => {
            let sigs = zcash::Signatures::decode(scanned)?;
            check_hash(expected, &sigs.sighash)?;
            check_count("orchard", orchard_alphas.len(), sigs.orchard.len())?;
            AuthorizationData::Zcash {
                sighash: EffectHash::new(sigs.sighash.to_vec()),
                transparent: sigs.transparent,
                orchard: sigs.orchard,
            }
        }
        (ChainFamily::Cosmos, TransactionPlan::Cosmos { .. }) => {
            let sigs = cosmos::Signatures::decode(scanned)?;
            check_hash(expected, &sigs.sign_doc_hash)?;
            if sigs.pubkey[..] != *viewing_key {
                return Err(CustodyError::SignerKeyMismatch);
            }
            AuthorizationData::Cosmos {
                sign_doc_hash: EffectHash::new(sigs.sign_doc_hash.to_vec()),
                signature: sigs.signature,
                pubkey: sigs.pubkey.to_vec(),
            }
        }
        _ => {
            return Err(qr::QrError::WrongChain {
                got: family.chain_id(),
                expected: wanted.chain_id(),
            }
            .into())
        }
    };
    Ok(data)
}
