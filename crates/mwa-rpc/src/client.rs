//! JSON-RPC client with a single outstanding request.
//!
//! [`JsonRpcClient::call`] sends the request immediately and returns a
//! [`PendingResponse`]. Until that request completes, further calls fail
//! with [`JsonRpcClientError::RequestInFlight`]. A request completes exactly
//! once, by whichever of these reaches the pending slot first:
//!
//! - a matching response passed to [`JsonRpcClient::receive`]
//! - the timeout timer
//! - [`PendingResponse::cancel`] / [`JsonRpcClient::cancel_pending`]
//! - [`JsonRpcClient::close`]
//!
//! The others find the slot empty (or holding a newer id) and do nothing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mwa_common::transport::MessageSender;

use crate::error::JsonRpcClientError;
use crate::message::{is_valid_method_name, JsonRpcError, JsonRpcRequest, JSONRPC_VERSION};

type CallResult = Result<Value, JsonRpcClientError>;

struct Pending {
    id: i64,
    method: String,
    tx: oneshot::Sender<CallResult>,
    /// Stops the timeout timer.
    timer: CancellationToken,
}

struct ClientState {
    next_id: i64,
    pending: Option<Pending>,
    closed: bool,
}

#[derive(Clone)]
struct Shared(Arc<Mutex<ClientState>>);

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Complete request `id` if it is still the outstanding one.
    fn complete(&self, id: i64, result: CallResult) -> bool {
        let pending = {
            let mut state = self.lock();
            match state.pending.as_ref() {
                Some(p) if p.id == id => state.pending.take(),
                _ => None,
            }
        };

        match pending {
            Some(p) => {
                p.timer.cancel();
                if p.tx.send(result).is_err() {
                    debug!(id, method = %p.method, "caller dropped before completion");
                }
                true
            }
            None => false,
        }
    }
}

/// JSON-RPC client bound to one outbound [`MessageSender`].
#[derive(Clone)]
pub struct JsonRpcClient {
    sender: Arc<dyn MessageSender>,
    shared: Shared,
}

impl JsonRpcClient {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self {
            sender,
            shared: Shared(Arc::new(Mutex::new(ClientState {
                next_id: 1,
                pending: None,
                closed: false,
            }))),
        }
    }

    /// Send a request.
    ///
    /// With a non-zero `timeout` a timer is spawned on the current Tokio
    /// runtime; this must then be called from within one.
    pub fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<PendingResponse, JsonRpcClientError> {
        validate(method, params.as_ref())?;

        let (tx, rx) = oneshot::channel();
        let timer = CancellationToken::new();
        let id = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(JsonRpcClientError::Closed);
            }
            if let Some(p) = state.pending.as_ref() {
                return Err(JsonRpcClientError::RequestInFlight(p.id));
            }
            let id = state.next_id;
            state.next_id += 1;
            state.pending = Some(Pending {
                id,
                method: method.to_string(),
                tx,
                timer: timer.clone(),
            });
            id
        };

        let request = JsonRpcRequest::new(method, params, id);
        let bytes = match serde_json::to_vec(&request) {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = JsonRpcClientError::Serialization(e.to_string());
                self.shared.complete(id, Err(err.clone()));
                return Err(err);
            }
        };

        if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = timer.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        if shared.complete(id, Err(JsonRpcClientError::Timeout { id, timeout })) {
                            warn!(id, ?timeout, "request timed out");
                        }
                    }
                }
            });
        }

        debug!(id, method, "sending request");
        if let Err(e) = self.sender.send(&bytes) {
            self.shared.complete(id, Err(e.clone().into()));
            return Err(e.into());
        }

        Ok(PendingResponse {
            id,
            rx,
            shared: self.shared.clone(),
        })
    }

    /// Send a request and wait for its outcome.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> CallResult {
        self.call(method, params, timeout)?.await_result().await
    }

    /// Send a notification. No id is allocated and no reply is expected.
    pub fn notification(&self, method: &str, params: Option<Value>) -> Result<(), JsonRpcClientError> {
        validate(method, params.as_ref())?;
        if self.shared.lock().closed {
            return Err(JsonRpcClientError::Closed);
        }
        let bytes = serde_json::to_vec(&JsonRpcRequest::notification(method, params))
            .map_err(|e| JsonRpcClientError::Serialization(e.to_string()))?;
        self.sender.send(&bytes)?;
        Ok(())
    }

    /// Handle one inbound message.
    ///
    /// Messages that do not carry the outstanding id are logged and dropped;
    /// the outstanding request stays pending.
    pub fn receive(&self, message: &[u8]) {
        let value: Value = match serde_json::from_slice(message) {
            Ok(v) => v,
            Err(e) => {
                warn!("dropping unparseable response: {e}");
                return;
            }
        };
        let Some(object) = value.as_object() else {
            warn!("dropping non-object response");
            return;
        };
        let Some(id) = object.get("id").and_then(Value::as_i64) else {
            warn!("dropping response without a numeric id");
            return;
        };

        let outstanding = self.shared.lock().pending.as_ref().map(|p| p.id);
        if outstanding != Some(id) {
            warn!(id, ?outstanding, "dropping response for unknown request");
            return;
        }

        let result = if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            Err(JsonRpcClientError::MalformedResponse(
                "missing or wrong jsonrpc version".into(),
            ))
        } else if let Some(error) = object.get("error") {
            match serde_json::from_value::<JsonRpcError>(error.clone()) {
                Ok(error) => Err(JsonRpcClientError::Remote(error)),
                Err(e) => Err(JsonRpcClientError::MalformedResponse(format!(
                    "invalid error object: {e}"
                ))),
            }
        } else if let Some(result) = object.get("result") {
            Ok(result.clone())
        } else {
            Err(JsonRpcClientError::MalformedResponse(
                "neither result nor error".into(),
            ))
        };

        self.shared.complete(id, result);
    }

    /// Cancel the outstanding request, if any.
    pub fn cancel_pending(&self) -> bool {
        let id = self.shared.lock().pending.as_ref().map(|p| p.id);
        match id {
            Some(id) => self.shared.complete(id, Err(JsonRpcClientError::Cancelled(id))),
            None => false,
        }
    }

    /// Fail the outstanding request and refuse further calls.
    pub fn close(&self) {
        let id = {
            let mut state = self.shared.lock();
            state.closed = true;
            state.pending.as_ref().map(|p| p.id)
        };
        if let Some(id) = id {
            self.shared.complete(id, Err(JsonRpcClientError::Closed));
        }
    }

    pub fn has_pending(&self) -> bool {
        self.shared.lock().pending.is_some()
    }
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("JsonRpcClient")
            .field("next_id", &state.next_id)
            .field("pending", &state.pending.as_ref().map(|p| p.id))
            .field("closed", &state.closed)
            .finish()
    }
}

fn validate(method: &str, params: Option<&Value>) -> Result<(), JsonRpcClientError> {
    if !is_valid_method_name(method) {
        return Err(JsonRpcClientError::InvalidMethod(method.to_string()));
    }
    match params {
        None | Some(Value::Object(_)) | Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(JsonRpcClientError::InvalidParams),
    }
}

/// Handle to an outstanding request.
pub struct PendingResponse {
    id: i64,
    rx: oneshot::Receiver<CallResult>,
    shared: Shared,
}

impl PendingResponse {
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Cancel this request. No-op if it already completed.
    pub fn cancel(&self) -> bool {
        self.shared
            .complete(self.id, Err(JsonRpcClientError::Cancelled(self.id)))
    }

    /// A handle that can cancel this request from elsewhere.
    pub fn canceller(&self) -> RequestCanceller {
        RequestCanceller {
            id: self.id,
            shared: self.shared.clone(),
        }
    }

    /// Wait for the outcome.
    pub async fn await_result(self) -> CallResult {
        self.rx.await.unwrap_or(Err(JsonRpcClientError::Closed))
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse").field("id", &self.id).finish()
    }
}

/// Cancels one specific request.
#[derive(Clone)]
pub struct RequestCanceller {
    id: i64,
    shared: Shared,
}

impl RequestCanceller {
    pub fn cancel(&self) -> bool {
        self.shared
            .complete(self.id, Err(JsonRpcClientError::Cancelled(self.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mwa_common::transport::TransportError;
    use serde_json::json;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<Value>>);

    impl Outbox {
        fn last(&self) -> Value {
            self.0.lock().unwrap().last().cloned().unwrap()
        }

        fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    impl MessageSender for Outbox {
        fn send(&self, message: &[u8]) -> Result<(), TransportError> {
            self.0
                .lock()
                .unwrap()
                .push(serde_json::from_slice(message).unwrap());
            Ok(())
        }
    }

    fn client() -> (JsonRpcClient, Arc<Outbox>) {
        let outbox = Arc::new(Outbox::default());
        (JsonRpcClient::new(outbox.clone()), outbox)
    }

    fn reply(id: i64, body: Value) -> Vec<u8> {
        let mut object = body;
        object["jsonrpc"] = json!("2.0");
        object["id"] = json!(id);
        serde_json::to_vec(&object).unwrap()
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_from_one() {
        let (client, outbox) = client();

        let first = client.call("get_capabilities", None, None).unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(
            outbox.last(),
            json!({"jsonrpc": "2.0", "method": "get_capabilities", "id": 1})
        );
        client.receive(&reply(1, json!({"result": {"ok": true}})));
        assert_eq!(first.await_result().await.unwrap(), json!({"ok": true}));

        let second = client.call("get_capabilities", Some(json!({})), None).unwrap();
        assert_eq!(second.id(), 2);
    }

    #[tokio::test]
    async fn test_second_call_is_usage_error() {
        let (client, outbox) = client();
        let _pending = client.call("authorize", Some(json!({})), None).unwrap();

        let err = client.call("authorize", Some(json!({})), None).unwrap_err();
        assert_eq!(err, JsonRpcClientError::RequestInFlight(1));
        assert!(err.is_usage_error());
        assert_eq!(outbox.len(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_id_is_dropped() {
        let (client, _) = client();
        let pending = client.call("authorize", None, None).unwrap();

        client.receive(&reply(7, json!({"result": {}})));
        client.receive(br#"{"jsonrpc":"2.0","result":{}}"#);
        client.receive(b"not json");
        assert!(client.has_pending());

        client.receive(&reply(1, json!({"result": "done"})));
        assert_eq!(pending.await_result().await.unwrap(), json!("done"));
        assert!(!client.has_pending());
    }

    #[tokio::test]
    async fn test_error_and_malformed_responses() {
        let (client, _) = client();

        let pending = client.call("sign_messages", None, None).unwrap();
        client.receive(&reply(
            1,
            json!({"error": {"code": -2, "message": "invalid payloads", "data": {"valid": [false]}}}),
        ));
        match pending.await_result().await {
            Err(JsonRpcClientError::Remote(e)) => {
                assert_eq!(e.code, -2);
                assert_eq!(e.data, Some(json!({"valid": [false]})));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let pending = client.call("sign_messages", None, None).unwrap();
        client.receive(&reply(2, json!({})));
        assert!(matches!(
            pending.await_result().await,
            Err(JsonRpcClientError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected_before_sending() {
        let (client, outbox) = client();
        assert!(matches!(
            client.call("", None, None),
            Err(JsonRpcClientError::InvalidMethod(_))
        ));
        assert!(matches!(
            client.call("rpc.discover", None, None),
            Err(JsonRpcClientError::InvalidMethod(_))
        ));
        assert_eq!(
            client.call("authorize", Some(json!(5)), None).unwrap_err(),
            JsonRpcClientError::InvalidParams
        );
        assert_eq!(outbox.len(), 0);
        assert!(!client.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_clears_slot() {
        let (client, _) = client();
        let pending = client
            .call("authorize", None, Some(Duration::from_secs(30)))
            .unwrap();

        let err = pending.await_result().await.unwrap_err();
        assert_eq!(
            err,
            JsonRpcClientError::Timeout {
                id: 1,
                timeout: Duration::from_secs(30)
            }
        );
        assert!(!client.has_pending());

        // A late response for the timed-out id changes nothing.
        client.receive(&reply(1, json!({"result": {}})));
        assert_eq!(client.call("authorize", None, None).unwrap().id(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_beats_timer() {
        let (client, _) = client();
        let pending = client
            .call("authorize", None, Some(Duration::from_secs(1)))
            .unwrap();
        client.receive(&reply(1, json!({"result": 1})));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(pending.await_result().await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_cancel_completes_once() {
        let (client, _) = client();
        let pending = client.call("authorize", None, None).unwrap();
        let canceller = pending.canceller();

        assert!(canceller.cancel());
        assert!(!pending.cancel());
        assert!(!client.cancel_pending());
        assert_eq!(
            pending.await_result().await,
            Err(JsonRpcClientError::Cancelled(1))
        );
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_later_calls() {
        let (client, _) = client();
        let pending = client.call("authorize", None, None).unwrap();
        client.close();
        assert_eq!(pending.await_result().await, Err(JsonRpcClientError::Closed));
        assert_eq!(
            client.call("authorize", None, None).unwrap_err(),
            JsonRpcClientError::Closed
        );
    }

    #[tokio::test]
    async fn test_notification_has_no_id() {
        let (client, outbox) = client();
        client.notification("log", Some(json!(["hello"]))).unwrap();
        assert_eq!(
            outbox.last(),
            json!({"jsonrpc": "2.0", "method": "log", "params": ["hello"]})
        );
        assert!(!client.has_pending());
    }
}
