use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use custody_core::backend::AuthorizationData;
use custody_core::network::ChainFamily;
use custody_core::paths::{data_dir, settings_path_in, store_path_in};
use custody_core::qr::{self, cosmos, penumbra, zcash, OpType, ViewingKeyExport, RANDOMIZER_LEN};
use custody_core::settings::{load_settings, save_settings};
use custody_core::{
    AirgapImport, AuthorizationOutcome, Authorizer, CustodySettings, FileStore, Keyring,
    KeyringState, Network, ReferenceBackend, SessionKey, TransactionPlan,
};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

mod terminal;

const PASSWORD_ENV: &str = "CUSTODY_PASSWORD";
const NEW_PASSWORD_ENV: &str = "CUSTODY_NEW_PASSWORD";
const MNEMONIC_ENV: &str = "CUSTODY_MNEMONIC";

#[derive(Parser, Debug)]
#[command(author, version, about = "Darklock custody vault", long_about = None)]
struct Cli {
    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show keyring state and vault count
    Status,

    /// Set the first password, or upgrade from the default password
    SetPassword,

    /// Re-encrypt every vault under a new password
    ChangePassword,

    /// Verify a password without unlocking
    CheckPassword,

    /// Store a recovery phrase
    AddMnemonic {
        #[arg(long, default_value = "Wallet")]
        name: String,
    },

    /// Import a signing device from its hex export codes
    ImportAirgap {
        #[arg(required = true)]
        codes: Vec<String>,
        #[arg(long)]
        device_id: Option<String>,
        #[arg(long, default_value = "")]
        name: String,
        /// Import without setting up a password first
        #[arg(long)]
        no_password: bool,
    },

    /// Add a later export code to an existing signing-device vault
    AttachExport { vault_id: String, code: String },

    /// List vaults
    List,

    Select { vault_id: String },

    Rename { vault_id: String, name: String },

    Delete { vault_id: String },

    /// Print a stored recovery phrase
    ShowMnemonic { vault_id: String },

    #[command(subcommand)]
    Networks(NetworkCommands),

    /// List watch-only wallets for a network
    Wallets { network: Network },

    /// Authorize a transaction with the selected vault
    Sign {
        #[arg(long)]
        network: Network,
        #[arg(long, default_value_t = 0)]
        account: u32,
        /// Plan body, signed as UTF-8 bytes
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long, default_value = "")]
        summary: String,
        /// Cosmos chain id; defaults to `<network>-1`
        #[arg(long)]
        chain_id: Option<String>,
        /// 32-byte hex randomizer per spend or orchard action
        #[arg(long = "randomizer")]
        randomizers: Vec<String>,
    },

    #[command(subcommand)]
    Qr(QrCommands),

    /// Simulate a signing device with a recovery phrase
    #[command(subcommand)]
    Device(DeviceCommands),
}

#[derive(Subcommand, Debug)]
enum NetworkCommands {
    List,
    Enable { network: Network },
    Disable { network: Network },
    Activate { network: Network },
}

#[derive(Subcommand, Debug)]
enum QrCommands {
    /// Decode a hex QR payload
    Inspect { code: String },
}

#[derive(Subcommand, Debug)]
enum DeviceCommands {
    /// Print the viewing-key export for a network
    Export {
        network: Network,
        #[arg(long, default_value_t = 0)]
        account: u32,
        #[arg(long, default_value = "")]
        label: String,
    },
    /// Answer a hex sign request with a signature code
    Sign { request: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Qr(QrCommands::Inspect { code }) => inspect(&decode_hex(&code)?),
        Commands::Device(command) => device_command(command),
        command => {
            let data = match cli.data_dir {
                Some(dir) => dir,
                None => data_dir()?,
            };
            let app = App::open(data).await?;
            app.run(command).await
        }
    }
}

struct App {
    keyring: Arc<Keyring>,
    settings: CustodySettings,
}

impl App {
    async fn open(data: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data)?;
        let settings_path = settings_path_in(&data);
        let settings = load_settings(&settings_path)?;
        if !settings_path.exists() {
            save_settings(&settings_path, &settings)?;
        }
        let store = FileStore::open(store_path_in(&data))
            .with_context(|| format!("opening store in {}", data.display()))?;
        let keyring = Arc::new(Keyring::new(Arc::new(store), SessionKey::new(), &settings));
        let state = keyring.init().await?;
        info!(?state, data = %data.display(), "custody store opened");
        Ok(Self { keyring, settings })
    }

    async fn run(&self, command: Commands) -> Result<()> {
        let kr = &self.keyring;
        match command {
            Commands::Status => {
                let status = serde_json::json!({
                    "state": kr.state(),
                    "passwordProtected": kr.is_password_protected().await?,
                    "vaults": kr.key_infos().await?.len(),
                    "selectedVaultId": kr.selected_vault_id().await?,
                    "activeNetwork": kr.active_network().await?,
                });
                println!("{}", serde_json::to_string_pretty(&status)?);
            }

            command @ Commands::SetPassword => {
                let password = prompt_new_password(new_password_env(&command))?;
                kr.set_password(&password).await?;
                println!("Password set");
            }

            command @ Commands::ChangePassword => {
                let old = prompt_password("Current password: ")?;
                let new = prompt_new_password(new_password_env(&command))?;
                kr.change_password(&old, &new).await?;
                println!("Password changed");
            }

            Commands::CheckPassword => {
                let password = prompt_password("Password: ")?;
                if kr.check_password(&password).await? {
                    println!("Password is correct");
                } else {
                    bail!("incorrect password");
                }
            }

            Commands::AddMnemonic { name } => {
                self.unlock_if_locked().await?;
                let phrase = prompt_secret(MNEMONIC_ENV, "Recovery phrase: ")?;
                let id = kr.new_mnemonic_vault(&phrase, &name).await?;
                println!("{id}");
            }

            Commands::ImportAirgap {
                codes,
                device_id,
                name,
                no_password,
            } => {
                let import = AirgapImport::from_hex(device_id, &codes)?;
                let id = if no_password {
                    kr.add_airgap_vault_without_password(&import, &name).await?
                } else {
                    self.unlock_if_locked().await?;
                    kr.new_airgap_vault(&import, &name).await?
                };
                println!("{id}");
            }

            Commands::AttachExport { vault_id, code } => {
                self.unlock_if_locked().await?;
                let added = kr.attach_airgap_export(&vault_id, &decode_hex(&code)?).await?;
                println!("{}", serde_json::to_string(&added)?);
            }

            Commands::List => {
                println!("{}", serde_json::to_string_pretty(&kr.key_infos().await?)?);
            }

            Commands::Select { vault_id } => kr.select_vault(&vault_id).await?,

            Commands::Rename { vault_id, name } => kr.rename_vault(&vault_id, &name).await?,

            Commands::Delete { vault_id } => {
                if !terminal::confirm(&format!("Delete vault {vault_id}? [y/N] "))? {
                    bail!("cancelled");
                }
                kr.delete_vault(&vault_id).await?;
            }

            Commands::ShowMnemonic { vault_id } => {
                self.unlock_if_locked().await?;
                let phrase = kr.get_mnemonic(&vault_id).await?;
                println!("{}", phrase.as_str());
            }

            Commands::Networks(command) => match command {
                NetworkCommands::List => {
                    let listing = serde_json::json!({
                        "enabled": kr.enabled_networks().await?,
                        "active": kr.active_network().await?,
                    });
                    println!("{}", serde_json::to_string_pretty(&listing)?);
                }
                NetworkCommands::Enable { network } => kr.enable_network(network).await?,
                NetworkCommands::Disable { network } => kr.disable_network(network).await?,
                NetworkCommands::Activate { network } => kr.set_active_network(network).await?,
            },

            Commands::Wallets { network } => {
                let wallets = kr.network_wallets(network).await?;
                println!("{}", serde_json::to_string_pretty(&wallets)?);
            }

            Commands::Sign {
                network,
                account,
                body,
                summary,
                chain_id,
                randomizers,
            } => {
                let randomizers = randomizers
                    .iter()
                    .map(|r| decode_array::<RANDOMIZER_LEN>(r))
                    .collect::<Result<Vec<_>>>()?;
                let plan = build_plan(network, account, body, summary, chain_id, randomizers);
                self.sign(plan).await?;
            }

            Commands::Qr(_) | Commands::Device(_) => bail!("command does not use the store"),
        }
        Ok(())
    }

    async fn unlock_if_locked(&self) -> Result<()> {
        if self.keyring.state() == KeyringState::Locked {
            let password = prompt_password("Password: ")?;
            self.keyring.unlock(&password).await?;
        }
        Ok(())
    }

    async fn sign(&self, plan: TransactionPlan) -> Result<()> {
        let (tx, rx) = mpsc::channel(1);
        let ui = tokio::spawn(terminal::serve(rx));
        let authorizer = Authorizer::new(
            self.keyring.clone(),
            Arc::new(ReferenceBackend::new()),
            tx,
            self.settings.authorization.clone(),
        );
        let outcome = authorizer.authorize(plan).await;
        drop(authorizer);
        ui.await?;

        match outcome {
            AuthorizationOutcome::Approved(data) => {
                print_authorization(&data);
                Ok(())
            }
            AuthorizationOutcome::Denied => bail!("authorization denied"),
            AuthorizationOutcome::Failed(err) => Err(anyhow!(err.user_message())),
        }
    }
}

fn build_plan(
    network: Network,
    account_index: u32,
    body: String,
    summary: String,
    chain_id: Option<String>,
    randomizers: Vec<[u8; RANDOMIZER_LEN]>,
) -> TransactionPlan {
    match network {
        Network::Penumbra => TransactionPlan::Penumbra {
            account_index,
            body: body.into_bytes(),
            spend_randomizers: randomizers,
            vote_randomizers: Vec::new(),
            summary,
        },
        Network::Zcash => TransactionPlan::Zcash {
            account_index,
            body: body.into_bytes(),
            orchard_alphas: randomizers,
            summary,
        },
        network => TransactionPlan::Cosmos {
            account_index,
            network,
            chain_id: chain_id.unwrap_or_else(|| format!("{network}-1")),
            sign_doc: body.into_bytes(),
            summary,
        },
    }
}

fn print_authorization(data: &AuthorizationData) {
    println!("Approved");
    println!("Effect hash: {}", data.effect_hash());
    println!("Signatures: {}", data.signature_count());
}

fn device_command(command: DeviceCommands) -> Result<()> {
    let seed = prompt_secret(MNEMONIC_ENV, "Device recovery phrase: ")?;
    let device = ReferenceBackend::new();
    let code = match command {
        DeviceCommands::Export {
            network,
            account,
            label,
        } => device.export_as_device(seed.as_bytes(), network, account, &label)?,
        DeviceCommands::Sign { request } => device.sign_as_device(seed.as_bytes(), &decode_hex(&request)?)?,
    };
    println!("{}", hex::encode(code));
    Ok(())
}

fn inspect(bytes: &[u8]) -> Result<()> {
    let (family, op) = qr::route(bytes)?;
    println!("Family: {family:?}");
    println!("Operation: {op:?}");
    match op {
        OpType::Export => {
            let export = ViewingKeyExport::decode(bytes)?;
            println!("Label: {}", export.label());
            println!("{}", serde_json::to_string_pretty(&export.viewing_keys())?);
        }
        OpType::SignRequest => match family {
            ChainFamily::Penumbra => {
                let req = penumbra::SignRequest::decode(bytes)?;
                println!("Effect hash: {}", hex::encode(req.effect_hash));
                println!("Spends: {} Votes: {}", req.spend_randomizers.len(), req.vote_randomizers.len());
                println!("Summary: {}", req.summary);
            }
            ChainFamily::Zcash => {
                let req = zcash::SignRequest::decode(bytes)?;
                println!("Sighash: {}", hex::encode(req.sighash));
                println!("Orchard actions: {}", req.orchard_alphas.len());
                println!("Summary: {}", req.summary);
            }
            ChainFamily::Cosmos => {
                let req = cosmos::SignRequest::decode(bytes)?;
                println!("Network: {} ({})", req.network, req.chain_id);
                println!("Sign doc hash: {}", hex::encode(req.sign_doc_hash));
                println!("Summary: {}", req.summary);
            }
        },
        OpType::Signatures => match family {
            ChainFamily::Penumbra => {
                let sigs = penumbra::Signatures::decode(bytes)?;
                println!("Effect hash: {}", hex::encode(sigs.effect_hash));
                println!("Spend auths: {} Vote auths: {}", sigs.spend_auths.len(), sigs.vote_auths.len());
            }
            ChainFamily::Zcash => {
                let sigs = zcash::Signatures::decode(bytes)?;
                println!("Sighash: {}", hex::encode(sigs.sighash));
                println!("Transparent: {} Orchard: {}", sigs.transparent.len(), sigs.orchard.len());
            }
            ChainFamily::Cosmos => {
                let sigs = cosmos::Signatures::decode(bytes)?;
                println!("Sign doc hash: {}", hex::encode(sigs.sign_doc_hash));
                println!("Pubkey: {}", hex::encode(sigs.pubkey));
            }
        },
    }
    Ok(())
}

fn decode_hex(code: &str) -> Result<Vec<u8>> {
    hex::decode(code.trim()).map_err(|e| anyhow!("invalid hex: {e}"))
}

fn decode_array<const N: usize>(code: &str) -> Result<[u8; N]> {
    let bytes = decode_hex(code)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("expected {N} bytes, got {}", bytes.len()))
}

fn prompt_secret(env: &str, prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(value) = std::env::var(env) {
        if !value.is_empty() {
            return Ok(Zeroizing::new(value));
        }
    }
    let value = rpassword::prompt_password(prompt).map_err(|e| anyhow!("prompt: {e}"))?;
    Ok(Zeroizing::new(value))
}

fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    prompt_secret(PASSWORD_ENV, prompt)
}

/// `change-password` needs the current password too, so its new one comes
/// from a separate variable.
fn new_password_env(command: &Commands) -> &'static str {
    match command {
        Commands::ChangePassword => NEW_PASSWORD_ENV,
        _ => PASSWORD_ENV,
    }
}

fn prompt_new_password(env: &str) -> Result<Zeroizing<String>> {
    let first = prompt_secret(env, "New password: ")?;
    if std::env::var(env).is_ok() {
        return Ok(first);
    }
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm password: ").map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    if first != second {
        bail!("passwords do not match");
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_password_reads_both_passwords_from_separate_variables() {
        assert_eq!(new_password_env(&Commands::SetPassword), PASSWORD_ENV);
        assert_eq!(new_password_env(&Commands::ChangePassword), NEW_PASSWORD_ENV);

        std::env::set_var(PASSWORD_ENV, "old secret");
        std::env::set_var(NEW_PASSWORD_ENV, "new secret");
        let old = prompt_password("Current password: ").unwrap();
        let new = prompt_new_password(new_password_env(&Commands::ChangePassword)).unwrap();
        assert_eq!(old.as_str(), "old secret");
        assert_eq!(new.as_str(), "new secret");
    }
}
