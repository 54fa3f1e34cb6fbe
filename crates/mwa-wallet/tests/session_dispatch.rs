//! A wallet scenario driven by a raw JSON-RPC client over an encrypted
//! initiator session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use mwa_common::protocol::encode_base64;
use mwa_common::transport::{MessageSender, TransportError};
use mwa_crypto::{
    AssociationKeypair, MobileWalletAdapterSession, ProtocolVersion, SessionListener,
    SessionRole, SessionState,
};
use mwa_rpc::{JsonRpcClient, JsonRpcClientError};
use mwa_wallet::auth::{InMemoryKeyProvider, ManualClock};
use mwa_wallet::{
    AuthIssuerConfig, AuthRepository, AuthorizeDecision, AuthorizeRequest, DelegateError,
    LocalWalletScenario, NewAccount, SignAndSendTransactionsRequest, SignMessagesRequest,
    SignTransactionsRequest, WalletConfig, WalletDelegate,
};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

struct QueueSender(mpsc::UnboundedSender<Vec<u8>>);

impl MessageSender for QueueSender {
    fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        self.0
            .send(message.to_vec())
            .map_err(|_| TransportError::Closed)
    }
}

/// Forwards decrypted replies to the JSON-RPC client.
struct ReplyListener {
    replies: mpsc::UnboundedSender<Vec<u8>>,
    established: Arc<Notify>,
}

impl SessionListener for ReplyListener {
    fn on_session_established(&self, _protocol_version: ProtocolVersion) {
        self.established.notify_one();
    }

    fn on_message(&self, message: &[u8]) {
        let _ = self.replies.send(message.to_vec());
    }
}

struct SoftwareWallet;

#[async_trait::async_trait]
impl WalletDelegate for SoftwareWallet {
    async fn authorize(&self, _request: &AuthorizeRequest) -> AuthorizeDecision {
        AuthorizeDecision::Approved {
            accounts: vec![NewAccount::new(vec![3u8; 32])],
            wallet_uri_base: None,
            scope: Vec::new(),
            sign_in_result: None,
        }
    }

    async fn sign_transactions(
        &self,
        request: &SignTransactionsRequest,
    ) -> Result<Vec<Vec<u8>>, DelegateError> {
        Ok(request.payloads.iter().map(|p| p.iter().rev().copied().collect()).collect())
    }

    async fn sign_messages(
        &self,
        request: &SignMessagesRequest,
    ) -> Result<Vec<Vec<u8>>, DelegateError> {
        Ok(request.payloads.clone())
    }

    async fn sign_and_send_transactions(
        &self,
        request: &SignAndSendTransactionsRequest,
    ) -> Result<Vec<Vec<u8>>, DelegateError> {
        Ok(request.payloads.iter().map(|_| vec![0u8; 64]).collect())
    }
}

fn pump(mut from: mpsc::UnboundedReceiver<Vec<u8>>, to: Arc<MobileWalletAdapterSession>) {
    tokio::spawn(async move {
        while let Some(message) = from.recv().await {
            if to.on_transport_message(&message).is_err() {
                break;
            }
        }
    });
}

struct Harness {
    wallet: LocalWalletScenario,
    client_session: Arc<MobileWalletAdapterSession>,
    client: JsonRpcClient,
}

async fn connect(repository: Arc<AuthRepository>) -> Harness {
    let association = AssociationKeypair::generate();
    let (to_client, client_inbound) = mpsc::unbounded_channel();
    let (to_wallet, wallet_inbound) = mpsc::unbounded_channel();
    let (reply_tx, mut replies) = mpsc::unbounded_channel::<Vec<u8>>();
    let established = Arc::new(Notify::new());

    let wallet = LocalWalletScenario::start(
        association.public_key(),
        Arc::new(QueueSender(to_client)),
        repository,
        Arc::new(SoftwareWallet),
        WalletConfig::default(),
    )
    .unwrap();

    let client_session = Arc::new(MobileWalletAdapterSession::new(
        SessionRole::Initiator(association),
        Arc::new(QueueSender(to_wallet)),
        Arc::new(ReplyListener {
            replies: reply_tx,
            established: established.clone(),
        }),
    ));
    let client = JsonRpcClient::new(client_session.clone());
    let receiver = client.clone();
    tokio::spawn(async move {
        while let Some(reply) = replies.recv().await {
            receiver.receive(&reply);
        }
    });

    pump(wallet_inbound, wallet.session().clone());
    pump(client_inbound, client_session.clone());

    wallet.session().on_transport_connected().unwrap();
    client_session.on_transport_connected().unwrap();
    assert_eq!(
        wallet.wait_established().await.unwrap(),
        ProtocolVersion::V1
    );
    tokio::time::timeout(Duration::from_secs(5), established.notified())
        .await
        .unwrap();
    assert_eq!(
        client_session.negotiated_protocol_version(),
        Some(ProtocolVersion::V1)
    );

    Harness {
        wallet,
        client_session,
        client,
    }
}

fn repository() -> Arc<AuthRepository> {
    Arc::new(AuthRepository::new(
        AuthIssuerConfig::default(),
        Arc::new(InMemoryKeyProvider::new()),
        Arc::new(ManualClock::default()),
    ))
}

fn identity() -> Value {
    json!({"name": "Dapp", "uri": "https://dapp.example", "icon": "icon.png"})
}

async fn remote_code(client: &JsonRpcClient, method: &str, params: Value) -> i32 {
    match client.request(method, Some(params), TIMEOUT).await {
        Err(JsonRpcClientError::Remote(e)) => e.code,
        other => panic!("expected a remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_authorize_sign_deauthorize_over_session() {
    let h = connect(repository()).await;

    let result = h
        .client
        .request(
            "authorize",
            Some(json!({"identity": identity(), "chain": "solana:devnet"})),
            TIMEOUT,
        )
        .await
        .unwrap();
    let token = result["auth_token"].as_str().unwrap().to_string();

    let result = h
        .client
        .request(
            "sign_transactions",
            Some(json!({"payloads": [encode_base64(&[1, 2, 3])], "auth_token": token})),
            TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(result["signed_payloads"][0], encode_base64(&[3, 2, 1]));

    let result = h
        .client
        .request("deauthorize", Some(json!({"auth_token": token})), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(result, json!({}));

    let code = remote_code(
        &h.client,
        "sign_transactions",
        json!({"payloads": [encode_base64(&[1, 2, 3])], "auth_token": token}),
    )
    .await;
    assert_eq!(code, -1);
}

#[tokio::test]
async fn test_many_requests_keep_sequence() {
    let h = connect(repository()).await;
    h.client
        .request("authorize", Some(json!({"identity": identity()})), TIMEOUT)
        .await
        .unwrap();

    for i in 0..20u8 {
        let result = h
            .client
            .request(
                "sign_messages",
                Some(json!({
                    "payloads": [encode_base64(&[i])],
                    "addresses": [encode_base64(&[3u8; 32])],
                })),
                TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(result["signed_payloads"][0], encode_base64(&[i]));
    }
}

#[tokio::test]
async fn test_protocol_errors_over_session() {
    let h = connect(repository()).await;

    assert_eq!(remote_code(&h.client, "rpc.internal", json!({})).await, -32601);
    assert_eq!(remote_code(&h.client, "no_such_method", json!({})).await, -32601);
    assert_eq!(
        remote_code(&h.client, "sign_transactions", json!({"payloads": ["AA=="]})).await,
        -1
    );
    assert_eq!(
        remote_code(
            &h.client,
            "authorize",
            json!({"identity": identity(), "chain": "solana:localnet"})
        )
        .await,
        -7
    );

    // Errors leave the session usable.
    let caps = h
        .client
        .request("get_capabilities", None, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(caps["max_messages_per_request"], 10);
}

#[tokio::test]
async fn test_tokens_outlive_the_session() {
    let repository = repository();

    let token = {
        let h = connect(repository.clone()).await;
        let result = h
            .client
            .request("authorize", Some(json!({"identity": identity()})), TIMEOUT)
            .await
            .unwrap();
        h.client_session.close();
        h.wallet.close();
        h.wallet.wait_closed().await.unwrap();
        result["auth_token"].as_str().unwrap().to_string()
    };

    let h = connect(repository).await;
    let result = h
        .client
        .request(
            "reauthorize",
            Some(json!({"identity": identity(), "auth_token": token})),
            TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(result["auth_token"], token);

    // The reauthorized session signs without resending the token.
    let result = h
        .client
        .request(
            "sign_and_send_transactions",
            Some(json!({"payloads": ["AA==", "AQ=="]})),
            TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(result["signatures"].as_array().unwrap().len(), 2);

    h.wallet.close();
    assert_eq!(h.wallet.session().state(), SessionState::Closed);
}
