//! Session state machine.
//!
//! A [`MobileWalletAdapterSession`] owns one handshake driver and, once
//! established, one [`EncryptedChannel`]. The transport drives it with
//! `on_transport_*` calls; upper layers send plaintext through
//! [`MobileWalletAdapterSession::send_message`] and receive plaintext via
//! [`SessionListener::on_message`].
//!
//! ```text
//! AwaitingConnection -> Establishing -> Encrypted -> Closed
//!          \                  \              /
//!           `------------------`--> Closed (error)
//! ```
//!
//! All state sits behind one mutex. Transport writes and listener callbacks
//! happen after the lock is released, so a listener may call back into the
//! session (or into a peer session on the same thread) without deadlocking.

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use mwa_common::transport::{MessageSender, TransportError};

use crate::association::{AssociationKeypair, AssociationPublicKey};
use crate::channel::{ChannelError, EncryptedChannel};
use crate::handshake::{
    Handshake, HandshakeError, InitiatorHandshake, ProtocolVersion, ResponderHandshake,
};

/// Session lifecycle states. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingConnection,
    Establishing,
    Encrypted,
    Closed,
}

/// Which side of the handshake this session plays.
#[derive(Debug)]
pub enum SessionRole {
    /// Client side: holds the association private key.
    Initiator(AssociationKeypair),
    /// Wallet side: knows the association public key from the out-of-band
    /// payload and optionally advertises a protocol version.
    Responder {
        association: AssociationPublicKey,
        protocol_version: Option<ProtocolVersion>,
    },
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Whether this error terminated the session.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::InvalidState { .. } => false,
            SessionError::Handshake(e) => !e.is_usage_error(),
            SessionError::Channel(_) | SessionError::Transport(_) => true,
        }
    }

    /// Whether this is a caller bug rather than a remote failure.
    pub fn is_usage_error(&self) -> bool {
        match self {
            SessionError::InvalidState { .. } => true,
            SessionError::Handshake(e) => e.is_usage_error(),
            _ => false,
        }
    }
}

/// Receives session events. Called without the session lock held.
pub trait SessionListener: Send + Sync {
    fn on_session_established(&self, _protocol_version: ProtocolVersion) {}

    /// One decrypted inbound message.
    fn on_message(&self, _message: &[u8]) {}

    /// Orderly close (local `close` or transport disconnect).
    fn on_session_closed(&self) {}

    /// Fatal error. The session is closed and `on_session_closed` will not
    /// follow.
    fn on_session_error(&self, _error: &SessionError) {}
}

enum Event {
    Established(ProtocolVersion),
    Message(Vec<u8>),
    Closed,
}

struct Inner {
    state: SessionState,
    handshake: Option<Handshake>,
    channel: Option<EncryptedChannel>,
    protocol_version: Option<ProtocolVersion>,
}

impl Inner {
    fn close(&mut self) {
        self.state = SessionState::Closed;
        self.handshake = None;
        self.channel = None;
    }
}

/// One association's encrypted session.
pub struct MobileWalletAdapterSession {
    inner: Mutex<Inner>,
    transport: Arc<dyn MessageSender>,
    listener: Arc<dyn SessionListener>,
}

impl MobileWalletAdapterSession {
    pub fn new(
        role: SessionRole,
        transport: Arc<dyn MessageSender>,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        let handshake = match role {
            SessionRole::Initiator(association) => {
                Handshake::Initiator(InitiatorHandshake::new(association))
            }
            SessionRole::Responder {
                association,
                protocol_version,
            } => Handshake::Responder(ResponderHandshake::new(association, protocol_version)),
        };

        Self {
            inner: Mutex::new(Inner {
                state: SessionState::AwaitingConnection,
                handshake: Some(handshake),
                channel: None,
                protocol_version: None,
            }),
            transport,
            listener,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Negotiated protocol version, once encrypted.
    pub fn negotiated_protocol_version(&self) -> Option<ProtocolVersion> {
        self.lock().protocol_version
    }

    pub fn is_initiator(&self) -> bool {
        matches!(self.lock().handshake, Some(Handshake::Initiator(_)))
    }

    /// The transport is connected. The initiator sends HELLO_REQ.
    pub fn on_transport_connected(&self) -> Result<(), SessionError> {
        let outbound = {
            let mut inner = self.lock();
            if inner.state != SessionState::AwaitingConnection {
                return Err(SessionError::InvalidState {
                    state: inner.state,
                    operation: "handle transport connection",
                });
            }
            inner.state = SessionState::Establishing;
            debug!("session establishing");

            match inner.handshake.as_mut() {
                Some(Handshake::Initiator(initiator)) => match initiator.hello_request() {
                    Ok(hello) => Some(hello),
                    Err(e) => {
                        drop(inner);
                        return Err(self.fail(e.into()));
                    }
                },
                _ => None,
            }
        };

        if let Some(hello) = outbound {
            if let Err(e) = self.transport.send(&hello) {
                return Err(self.fail(e.into()));
            }
        }
        Ok(())
    }

    /// One inbound transport message.
    ///
    /// Zero-length messages are keepalives and ignored in every state.
    pub fn on_transport_message(&self, message: &[u8]) -> Result<(), SessionError> {
        if message.is_empty() {
            debug!("keepalive");
            return Ok(());
        }

        let mut outbound = None;
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            let result = match inner.state {
                SessionState::Establishing => {
                    Self::handle_handshake_message(&mut inner, message, &mut outbound, &mut events)
                }
                SessionState::Encrypted => match inner.channel.as_mut() {
                    Some(channel) => channel
                        .decrypt(message)
                        .map(|plaintext| events.push(Event::Message(plaintext)))
                        .map_err(SessionError::from),
                    None => Err(SessionError::InvalidState {
                        state: inner.state,
                        operation: "decrypt without a channel",
                    }),
                },
                SessionState::Closed => {
                    debug!(len = message.len(), "dropping message for closed session");
                    return Ok(());
                }
                SessionState::AwaitingConnection => {
                    return Err(SessionError::InvalidState {
                        state: inner.state,
                        operation: "receive before the transport is connected",
                    });
                }
            };

            if let Err(e) = result {
                drop(inner);
                return Err(self.fail(e));
            }
        }

        if let Some(reply) = outbound {
            if let Err(e) = self.transport.send(&reply) {
                return Err(self.fail(e.into()));
            }
        }
        self.deliver(events);
        Ok(())
    }

    fn handle_handshake_message(
        inner: &mut Inner,
        message: &[u8],
        outbound: &mut Option<Vec<u8>>,
        events: &mut Vec<Event>,
    ) -> Result<(), SessionError> {
        let (channel, version) = match inner.handshake.as_mut() {
            Some(Handshake::Initiator(initiator)) => initiator.handle_hello_response(message)?,
            Some(Handshake::Responder(responder)) => {
                let (reply, channel, version) = responder.handle_hello_request(message)?;
                *outbound = Some(reply);
                (channel, version)
            }
            None => {
                return Err(SessionError::InvalidState {
                    state: inner.state,
                    operation: "handshake without a driver",
                })
            }
        };

        inner.channel = Some(channel);
        inner.protocol_version = Some(version);
        inner.state = SessionState::Encrypted;
        info!(protocol_version = %version, "session encrypted");
        events.push(Event::Established(version));
        Ok(())
    }

    /// The transport went away. Reports `on_session_closed` unless the
    /// session already ended.
    pub fn on_transport_disconnected(&self) {
        self.close_with_reason("transport disconnected");
    }

    /// Close the session locally.
    pub fn close(&self) {
        self.close_with_reason("closed locally");
    }

    fn close_with_reason(&self, reason: &'static str) {
        {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return;
            }
            inner.close();
        }
        info!(reason, "session closed");
        self.deliver(vec![Event::Closed]);
    }

    /// Encrypt `plaintext` and hand the frame to the transport.
    ///
    /// Frames reach the transport in sequence order only if callers do not
    /// send concurrently.
    pub fn send_message(&self, plaintext: &[u8]) -> Result<(), SessionError> {
        let frame = {
            let mut inner = self.lock();
            let state = inner.state;
            let Some(channel) = inner.channel.as_mut().filter(|_| state == SessionState::Encrypted)
            else {
                return Err(SessionError::InvalidState {
                    state,
                    operation: "send",
                });
            };
            match channel.encrypt(plaintext) {
                Ok(frame) => frame,
                Err(e) => {
                    drop(inner);
                    return Err(self.fail(e.into()));
                }
            }
        };

        if let Err(e) = self.transport.send(&frame) {
            return Err(self.fail(e.into()));
        }
        Ok(())
    }

    /// Close on a fatal error and report it once.
    fn fail(&self, error: SessionError) -> SessionError {
        let first = {
            let mut inner = self.lock();
            let first = inner.state != SessionState::Closed;
            inner.close();
            first
        };
        if first {
            warn!("session failed: {error}");
            self.listener.on_session_error(&error);
        }
        error
    }

    fn deliver(&self, events: Vec<Event>) {
        for event in events {
            match event {
                Event::Established(version) => self.listener.on_session_established(version),
                Event::Message(message) => self.listener.on_message(&message),
                Event::Closed => self.listener.on_session_closed(),
            }
        }
    }
}

impl MessageSender for MobileWalletAdapterSession {
    fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        self.send_message(message).map_err(|e| match e {
            SessionError::InvalidState { .. } => TransportError::Closed,
            other => TransportError::SendFailed(other.to_string()),
        })
    }
}

impl std::fmt::Debug for MobileWalletAdapterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MobileWalletAdapterSession")
            .field("state", &inner.state)
            .field("protocol_version", &inner.protocol_version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn take(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl MessageSender for RecordingTransport {
        fn send(&self, message: &[u8]) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Closed);
            }
            self.sent.lock().unwrap().push(message.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SessionListener for RecordingListener {
        fn on_session_established(&self, protocol_version: ProtocolVersion) {
            self.events
                .lock()
                .unwrap()
                .push(format!("established:{protocol_version}"));
        }

        fn on_message(&self, message: &[u8]) {
            self.events
                .lock()
                .unwrap()
                .push(format!("message:{}", String::from_utf8_lossy(message)));
        }

        fn on_session_closed(&self) {
            self.events.lock().unwrap().push("closed".into());
        }

        fn on_session_error(&self, _error: &SessionError) {
            self.events.lock().unwrap().push("error".into());
        }
    }

    struct Peer {
        session: MobileWalletAdapterSession,
        transport: Arc<RecordingTransport>,
        listener: Arc<RecordingListener>,
    }

    fn peer(role: SessionRole) -> Peer {
        let transport = Arc::new(RecordingTransport::default());
        let listener = Arc::new(RecordingListener::default());
        Peer {
            session: MobileWalletAdapterSession::new(role, transport.clone(), listener.clone()),
            transport,
            listener,
        }
    }

    fn pair(version: Option<ProtocolVersion>) -> (Peer, Peer) {
        let association = AssociationKeypair::generate();
        let wallet = peer(SessionRole::Responder {
            association: association.public_key(),
            protocol_version: version,
        });
        let client = peer(SessionRole::Initiator(association));
        (client, wallet)
    }

    fn establish(client: &Peer, wallet: &Peer) {
        wallet.session.on_transport_connected().unwrap();
        client.session.on_transport_connected().unwrap();
        assert!(wallet.transport.take().is_empty());

        let hello_req = client.transport.take().remove(0);
        wallet.session.on_transport_message(&hello_req).unwrap();
        let hello_rsp = wallet.transport.take().remove(0);
        client.session.on_transport_message(&hello_rsp).unwrap();
    }

    #[test]
    fn test_establish_and_exchange() {
        let (client, wallet) = pair(Some(ProtocolVersion::V1));
        assert_eq!(client.session.state(), SessionState::AwaitingConnection);
        establish(&client, &wallet);

        assert_eq!(client.session.state(), SessionState::Encrypted);
        assert_eq!(wallet.session.state(), SessionState::Encrypted);
        assert_eq!(
            client.session.negotiated_protocol_version(),
            Some(ProtocolVersion::V1)
        );
        assert!(client.session.is_initiator());
        assert!(!wallet.session.is_initiator());

        client.session.send_message(b"request").unwrap();
        let frame = client.transport.take().remove(0);
        wallet.session.on_transport_message(&frame).unwrap();

        wallet.session.send_message(b"response").unwrap();
        let frame = wallet.transport.take().remove(0);
        client.session.on_transport_message(&frame).unwrap();

        assert_eq!(
            wallet.listener.events(),
            vec!["established:v1", "message:request"]
        );
        assert_eq!(
            client.listener.events(),
            vec!["established:v1", "message:response"]
        );
    }

    #[test]
    fn test_keepalive_ignored_in_every_state() {
        let (client, wallet) = pair(None);
        client.session.on_transport_message(&[]).unwrap();
        establish(&client, &wallet);
        client.session.on_transport_message(&[]).unwrap();
        client.session.close();
        client.session.on_transport_message(&[]).unwrap();
        assert_eq!(client.listener.events(), vec!["established:legacy", "closed"]);
    }

    #[test]
    fn test_replayed_frame_is_fatal() {
        let (client, wallet) = pair(None);
        establish(&client, &wallet);

        client.session.send_message(b"once").unwrap();
        let frame = client.transport.take().remove(0);
        wallet.session.on_transport_message(&frame).unwrap();

        let err = wallet.session.on_transport_message(&frame).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            SessionError::Channel(ChannelError::SequenceMismatch { .. })
        ));
        assert_eq!(wallet.session.state(), SessionState::Closed);

        // Error replaces the closed notification; later closes are silent.
        wallet.session.on_transport_disconnected();
        assert_eq!(
            wallet.listener.events(),
            vec!["established:legacy", "message:once", "error"]
        );
    }

    #[test]
    fn test_bad_signature_closes_with_error() {
        let wallet = peer(SessionRole::Responder {
            association: AssociationKeypair::generate().public_key(),
            protocol_version: None,
        });
        let client = peer(SessionRole::Initiator(AssociationKeypair::generate()));
        wallet.session.on_transport_connected().unwrap();
        client.session.on_transport_connected().unwrap();

        let hello_req = client.transport.take().remove(0);
        let err = wallet.session.on_transport_message(&hello_req).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Handshake(HandshakeError::SignatureInvalid)
        ));
        assert_eq!(wallet.session.state(), SessionState::Closed);
        assert!(wallet.transport.take().is_empty());
        assert_eq!(wallet.listener.events(), vec!["error"]);
    }

    #[test]
    fn test_usage_errors_leave_session_alone() {
        let (client, wallet) = pair(None);

        let err = client.session.send_message(b"too early").unwrap_err();
        assert!(err.is_usage_error());
        assert!(!err.is_fatal());

        let err = client.session.on_transport_message(b"early").unwrap_err();
        assert!(err.is_usage_error());
        assert_eq!(client.session.state(), SessionState::AwaitingConnection);

        establish(&client, &wallet);
        let err = client.session.on_transport_connected().unwrap_err();
        assert!(err.is_usage_error());
        assert_eq!(client.session.state(), SessionState::Encrypted);
        assert!(client.listener.events().iter().all(|e| e != "error"));
    }

    #[test]
    fn test_transport_failure_is_fatal() {
        let association = AssociationKeypair::generate();
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let listener = Arc::new(RecordingListener::default());
        let session = MobileWalletAdapterSession::new(
            SessionRole::Initiator(association),
            transport,
            listener.clone(),
        );

        let err = session.on_transport_connected().unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Closed)));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(listener.events(), vec!["error"]);
    }

    #[test]
    fn test_close_reports_once_and_blocks_send() {
        let (client, wallet) = pair(None);
        establish(&client, &wallet);

        client.session.close();
        client.session.on_transport_disconnected();
        assert_eq!(client.listener.events(), vec!["established:legacy", "closed"]);

        assert_eq!(
            MessageSender::send(&client.session, b"late"),
            Err(TransportError::Closed)
        );
    }
}
