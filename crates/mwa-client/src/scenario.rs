//! Dapp end of one association: an initiator session carrying a
//! JSON-RPC client.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use mwa_common::transport::{MessageSender, TransportError};
use mwa_crypto::{
    AssociationKeypair, MobileWalletAdapterSession, ProtocolVersion, SessionError,
    SessionListener, SessionRole,
};
use mwa_rpc::JsonRpcClient;

use crate::client::MobileWalletAdapterClient;
use crate::error::ScenarioError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Pending,
    Established(ProtocolVersion),
    Closed,
    Failed(String),
}

/// Routes JSON-RPC output into the session that owns the client. Bound
/// once the session exists.
struct SessionSender(Arc<OnceLock<Weak<MobileWalletAdapterSession>>>);

impl MessageSender for SessionSender {
    fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        match self.0.get().and_then(Weak::upgrade) {
            Some(session) => session.send(message),
            None => Err(TransportError::Closed),
        }
    }
}

struct ClientListener {
    rpc: JsonRpcClient,
    status: watch::Sender<Status>,
}

impl SessionListener for ClientListener {
    fn on_session_established(&self, protocol_version: ProtocolVersion) {
        info!(%protocol_version, "client session established");
        self.status.send_replace(Status::Established(protocol_version));
    }

    fn on_message(&self, message: &[u8]) {
        self.rpc.receive(message);
    }

    fn on_session_closed(&self) {
        info!("client session closed");
        self.rpc.close();
        self.status.send_replace(Status::Closed);
    }

    fn on_session_error(&self, error: &SessionError) {
        warn!("client session failed: {error}");
        self.rpc.close();
        self.status.send_replace(Status::Failed(error.to_string()));
    }
}

/// One dapp-side scenario.
///
/// The embedding transport delivers its events to [`session`](Self::session);
/// the caller drives the wallet through [`client`](Self::client) once
/// [`wait_established`](Self::wait_established) returns.
pub struct LocalClientScenario {
    session: Arc<MobileWalletAdapterSession>,
    client: MobileWalletAdapterClient,
    status: watch::Receiver<Status>,
}

impl LocalClientScenario {
    /// `timeout` bounds each wallet call; `None` waits indefinitely.
    pub fn new(
        association: AssociationKeypair,
        transport: Arc<dyn MessageSender>,
        timeout: Option<Duration>,
    ) -> Self {
        let (status_tx, status) = watch::channel(Status::Pending);
        let binding = Arc::new(OnceLock::new());
        let rpc = JsonRpcClient::new(Arc::new(SessionSender(binding.clone())));
        let session = Arc::new(MobileWalletAdapterSession::new(
            SessionRole::Initiator(association),
            transport,
            Arc::new(ClientListener {
                rpc: rpc.clone(),
                status: status_tx,
            }),
        ));
        let bound = binding.set(Arc::downgrade(&session)).is_ok();
        debug_assert!(bound, "session binding is set once, right after construction");

        Self {
            session,
            client: MobileWalletAdapterClient::new(rpc, timeout),
            status,
        }
    }

    pub fn session(&self) -> &Arc<MobileWalletAdapterSession> {
        &self.session
    }

    pub fn client(&self) -> &MobileWalletAdapterClient {
        &self.client
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

    pub fn close(&self) {
        self.session.close();
    }
}

impl Drop for LocalClientScenario {
    fn drop(&mut self) {
        self.session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Discard;

    impl MessageSender for Discard {
        fn send(&self, _message: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn test_session_sender_follows_binding() {
        let binding = Arc::new(OnceLock::new());
        let sender = SessionSender(binding.clone());
        assert_eq!(sender.send(b"{}"), Err(TransportError::Closed));

        let (status, _) = watch::channel(Status::Pending);
        let session = Arc::new(MobileWalletAdapterSession::new(
            SessionRole::Initiator(AssociationKeypair::generate()),
            Arc::new(Discard),
            Arc::new(ClientListener {
                rpc: JsonRpcClient::new(Arc::new(Discard)),
                status,
            }),
        ));
        assert!(binding.set(Arc::downgrade(&session)).is_ok());
        assert!(binding.set(Arc::downgrade(&session)).is_err());

        drop(session);
        assert_eq!(sender.send(b"{}"), Err(TransportError::Closed));
    }
}
