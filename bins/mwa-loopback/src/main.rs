#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{info, warn};

use mwa_client::{ClientError, LocalClientScenario};
use mwa_common::protocol::{AppIdentity, AuthorizeParams, SignAndSendOptions};
use mwa_common::transport::{MessageSender, TransportError};
use mwa_crypto::{
    AssociationKeypair, AssociationPublicKey, MobileWalletAdapterSession, ProtocolVersion,
};
use mwa_wallet::auth::{FileKeyProvider, SystemClock};
use mwa_wallet::{
    AuthIssuerConfig, AuthRepository, AuthorizeDecision, AuthorizeRequest, DelegateError,
    LocalWalletScenario, NewAccount, SignAndSendTransactionsRequest, SignMessagesRequest,
    SignTransactionsRequest, WalletConfig, WalletDelegate,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Version {
    Legacy,
    V1,
}

#[derive(Parser, Debug)]
#[command(name = "mwa-loopback")]
struct Args {
    /// Default log filter when RUST_LOG is unset.
    #[arg(long, env = "MWA_LOG", default_value = "info")]
    log_level: String,

    /// Transactions to sign in one request.
    #[arg(long, default_value_t = 3)]
    payloads: usize,

    /// Per-call timeout; 0 disables it.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Protocol version the wallet advertises.
    #[arg(long, value_enum, default_value = "v1")]
    protocol_version: Version,

    /// Keep wrapping keys and the authorization snapshot here.
    #[arg(long, env = "MWA_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// JSON token-issuer config; environment overrides apply otherwise.
    #[arg(long)]
    auth_config: Option<PathBuf>,

    /// JSON wallet config.
    #[arg(long)]
    wallet_config: Option<PathBuf>,
}

const DEMO_ACCOUNT: [u8; 32] = [0x42; 32];

/// Approves everything and "signs" by appending a fixed tag.
struct DemoWallet;

#[async_trait::async_trait]
impl WalletDelegate for DemoWallet {
    async fn authorize(&self, request: &AuthorizeRequest) -> AuthorizeDecision {
        info!(name = ?request.identity.name, chain = %request.chain, "approving dapp");
        AuthorizeDecision::Approved {
            accounts: vec![NewAccount::new(DEMO_ACCOUNT.to_vec()).with_label("Demo account")],
            wallet_uri_base: None,
            scope: Vec::new(),
            sign_in_result: None,
        }
    }

    async fn sign_transactions(
        &self,
        request: &SignTransactionsRequest,
    ) -> Result<Vec<Vec<u8>>, DelegateError> {
        Ok(request.payloads.iter().map(|p| demo_sign(p)).collect())
    }

    async fn sign_messages(
        &self,
        request: &SignMessagesRequest,
    ) -> Result<Vec<Vec<u8>>, DelegateError> {
        Ok(request.payloads.iter().map(|p| demo_sign(p)).collect())
    }

    async fn sign_and_send_transactions(
        &self,
        request: &SignAndSendTransactionsRequest,
    ) -> Result<Vec<Vec<u8>>, DelegateError> {
        Ok(request.payloads.iter().map(|_| vec![0x5a; 64]).collect())
    }
}

fn demo_sign(payload: &[u8]) -> Vec<u8> {
    let mut signed = payload.to_vec();
    signed.extend_from_slice(&[0x5a; 64]);
    signed
}

struct QueueSender(mpsc::UnboundedSender<Vec<u8>>);

impl MessageSender for QueueSender {
    fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        self.0
            .send(message.to_vec())
            .map_err(|_| TransportError::Closed)
    }
}

fn pump(mut from: mpsc::UnboundedReceiver<Vec<u8>>, to: Arc<MobileWalletAdapterSession>) {
    tokio::spawn(async move {
        while let Some(message) = from.recv().await {
            if let Err(e) = to.on_transport_message(&message) {
                warn!("delivery stopped: {e}");
                break;
            }
        }
        to.on_transport_disconnected();
    });
}

fn repository(args: &Args) -> Result<AuthRepository> {
    let config = match &args.auth_config {
        Some(path) => AuthIssuerConfig::from_file(path)?,
        None => AuthIssuerConfig::from_env(),
    };
    config.validate()?;

    match &args.state_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
            Ok(AuthRepository::open(
                dir.join("authorizations.json"),
                config,
                Arc::new(FileKeyProvider::new(dir.join("keys"))),
                Arc::new(SystemClock),
            )?)
        }
        None => Ok(AuthRepository::in_memory(config)),
    }
}

fn wallet_config(args: &Args) -> Result<WalletConfig> {
    let mut config = match &args.wallet_config {
        Some(path) => WalletConfig::from_file(path)?,
        None => WalletConfig::from_env(),
    };
    config.protocol_version = match args.protocol_version {
        Version::Legacy => None,
        Version::V1 => Some(ProtocolVersion::V1),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    mwa_common::init_tracing_with_default(&args.log_level);

    if args.payloads == 0 {
        bail!("--payloads must be at least 1");
    }
    let timeout = Some(Duration::from_millis(args.timeout_ms)).filter(|t| !t.is_zero());

    let repository = Arc::new(repository(&args)?);
    let config = wallet_config(&args)?;

    // The association token is what a QR code or deep link would carry.
    let association = AssociationKeypair::generate();
    let token = association.association_token();
    info!(association = %token, "association created");
    let wallet_key = AssociationPublicKey::from_association_token(&token)?;

    let (to_client, client_inbound) = mpsc::unbounded_channel();
    let (to_wallet, wallet_inbound) = mpsc::unbounded_channel();

    let wallet = LocalWalletScenario::start(
        wallet_key,
        Arc::new(QueueSender(to_client)),
        repository.clone(),
        Arc::new(DemoWallet),
        config,
    )?;
    let dapp = LocalClientScenario::new(association, Arc::new(QueueSender(to_wallet)), timeout);

    pump(wallet_inbound, wallet.session().clone());
    pump(client_inbound, dapp.session().clone());
    wallet.session().on_transport_connected()?;
    dapp.session().on_transport_connected()?;

    let version = dapp.wait_established().await?;
    info!(%version, "session established");
    let client = dapp.client();

    let params = AuthorizeParams {
        identity: AppIdentity {
            name: Some("Loopback dapp".into()),
            uri: Some("https://loopback.invalid".into()),
            icon: Some("favicon.ico".into()),
        },
        chain: Some("solana:devnet".into()),
        ..Default::default()
    };
    let auth = client.authorize(&params).await?;
    info!(accounts = auth.accounts.len(), "authorized");

    let caps = client.get_capabilities().await?;
    info!(
        max_transactions = caps.max_transactions_per_request,
        max_messages = caps.max_messages_per_request,
        "wallet capabilities"
    );

    let payloads: Vec<Vec<u8>> = (0..args.payloads).map(|i| vec![i as u8; 16]).collect();
    match client.sign_transactions(&payloads).await {
        Ok(signed) => info!(count = signed.len(), "transactions signed"),
        Err(ClientError::TooManyPayloads(message)) => {
            warn!("wallet refused {} payloads: {message}", args.payloads)
        }
        Err(e) => return Err(e.into()),
    }

    let messages = client
        .sign_messages(&[b"loopback".to_vec()], &[DEMO_ACCOUNT.to_vec()])
        .await?;
    info!(count = messages.len(), "messages signed");

    if caps.supports_sign_and_send_transactions {
        let signatures = client
            .sign_and_send_transactions(&payloads[..1], SignAndSendOptions::default())
            .await?;
        info!(count = signatures.len(), "transactions submitted");
    }

    client.deauthorize(&auth.auth_token).await?;
    match client.sign_transactions(&payloads[..1]).await {
        Err(ClientError::AuthorizationFailed(_)) => info!("token rejected after deauthorize"),
        other => bail!("expected authorization failure after deauthorize, got {other:?}"),
    }

    dapp.close();
    wallet.close();
    wallet.wait_closed().await?;
    println!(
        "loopback complete: protocol {version}, {} identities on record",
        repository.list_identities().len()
    );
    Ok(())
}
