//! Wallet end of one association: a responder session feeding the
//! dispatcher.
//!
//! Decrypted requests are queued to a single worker task, which handles
//! them one at a time. Replies therefore leave in request order and
//! `send_message` is never called concurrently.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use mwa_common::transport::MessageSender;
use mwa_crypto::{
    AssociationPublicKey, MobileWalletAdapterSession, ProtocolVersion, SessionError,
    SessionListener, SessionRole,
};
use mwa_rpc::JsonRpcServerError;

use crate::auth::AuthRepository;
use crate::config::WalletConfig;
use crate::delegate::WalletDelegate;
use crate::dispatcher::MwaDispatcher;
use crate::error::ScenarioError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Pending,
    Established(ProtocolVersion),
    Closed,
    Failed(String),
}

struct WalletListener {
    requests: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    status: watch::Sender<Status>,
}

impl WalletListener {
    fn stop_worker(&self) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl SessionListener for WalletListener {
    fn on_session_established(&self, protocol_version: ProtocolVersion) {
        info!(%protocol_version, "wallet session established");
        self.status.send_replace(Status::Established(protocol_version));
    }

    fn on_message(&self, message: &[u8]) {
        let requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(requests) = requests.as_ref() {
            if requests.send(message.to_vec()).is_err() {
                debug!("request worker gone, dropping request");
            }
        }
    }

    fn on_session_closed(&self) {
        info!("wallet session closed");
        self.stop_worker();
        self.status.send_replace(Status::Closed);
    }

    fn on_session_error(&self, error: &SessionError) {
        warn!("wallet session failed: {error}");
        self.stop_worker();
        self.status.send_replace(Status::Failed(error.to_string()));
    }
}

/// One wallet-side scenario.
///
/// The embedding transport delivers its events to [`session`](Self::session).
/// Must be started inside a Tokio runtime.
pub struct LocalWalletScenario {
    session: Arc<MobileWalletAdapterSession>,
    status: watch::Receiver<Status>,
}

impl LocalWalletScenario {
    pub fn start(
        association: AssociationPublicKey,
        transport: Arc<dyn MessageSender>,
        repository: Arc<AuthRepository>,
        delegate: Arc<dyn WalletDelegate>,
        config: WalletConfig,
    ) -> Result<Self, JsonRpcServerError> {
        let protocol_version = config.protocol_version;
        let dispatcher = MwaDispatcher::new(repository, delegate, config)?;

        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (status_tx, status) = watch::channel(Status::Pending);
        let listener = Arc::new(WalletListener {
            requests: Mutex::new(Some(request_tx)),
            status: status_tx,
        });

        let session = Arc::new(MobileWalletAdapterSession::new(
            SessionRole::Responder {
                association,
                protocol_version,
            },
            transport,
            listener,
        ));

        let worker_session = session.clone();
        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let Some(reply) = dispatcher.handle_message(&request).await else {
                    continue;
                };
                if let Err(e) = worker_session.send_message(&reply) {
                    warn!("failed to send reply: {e}");
                    break;
                }
            }
            debug!("request worker stopped");
        });

        Ok(Self { session, status })
    }

    pub fn session(&self) -> &Arc<MobileWalletAdapterSession> {
        &self.session
    }

    /// Wait for the handshake to finish.
    pub async fn wait_established(&self) -> Result<ProtocolVersion, ScenarioError> {
        let mut status = self.status.clone();
        let outcome = status
            .wait_for(|s| *s != Status::Pending)
            .await
            .map(|s| s.clone())
            .map_err(|_| ScenarioError::Closed)?;
        match outcome {
            Status::Established(version) => Ok(version),
            Status::Failed(reason) => Err(ScenarioError::Failed(reason)),
            Status::Closed | Status::Pending => Err(ScenarioError::Closed),
        }
    }

    /// Wait until the session ends, returning the failure if it had one.
    pub async fn wait_closed(&self) -> Result<(), ScenarioError> {
        let mut status = self.status.clone();
        let outcome = status
            .wait_for(|s| matches!(s, Status::Closed | Status::Failed(_)))
            .await
            .map(|s| s.clone())
            .map_err(|_| ScenarioError::Closed)?;
        match outcome {
            Status::Failed(reason) => Err(ScenarioError::Failed(reason)),
            _ => Ok(()),
        }
    }

    pub fn close(&self) {
        self.session.close();
    }
}

impl Drop for LocalWalletScenario {
    fn drop(&mut self) {
        self.session.close();
    }
}
