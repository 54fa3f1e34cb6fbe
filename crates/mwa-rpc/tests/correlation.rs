//! Client and server wired back to back through in-memory queues.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use mwa_common::transport::{MessageSender, TransportError};
use mwa_rpc::{JsonRpcClient, JsonRpcClientError, JsonRpcError, JsonRpcServer, RpcMethod};

struct QueueSender(mpsc::UnboundedSender<Vec<u8>>);

impl MessageSender for QueueSender {
    fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        self.0
            .send(message.to_vec())
            .map_err(|_| TransportError::Closed)
    }
}

#[derive(Deserialize)]
struct AddParams {
    a: i64,
    b: i64,
}

struct Add;

#[async_trait::async_trait]
impl RpcMethod for Add {
    const NAME: &'static str = "add";
    type Params = AddParams;
    type Result = i64;

    async fn call(&self, params: AddParams) -> Result<i64, JsonRpcError> {
        params
            .a
            .checked_add(params.b)
            .ok_or_else(|| JsonRpcError::new(-1, "overflow"))
    }
}

/// Never answers until released.
struct Stall(Arc<Notify>);

#[async_trait::async_trait]
impl RpcMethod for Stall {
    const NAME: &'static str = "stall";
    type Params = Value;
    type Result = Value;

    async fn call(&self, _params: Value) -> Result<Value, JsonRpcError> {
        self.0.notified().await;
        Ok(json!("released"))
    }
}

fn wire(server: JsonRpcServer) -> JsonRpcClient {
    let (to_server, mut server_inbox) = mpsc::unbounded_channel::<Vec<u8>>();
    let client = JsonRpcClient::new(Arc::new(QueueSender(to_server)));

    let receiver = client.clone();
    tokio::spawn(async move {
        while let Some(request) = server_inbox.recv().await {
            if let Some(reply) = server.handle_message(&request).await {
                receiver.receive(&reply);
            }
        }
    });
    client
}

#[tokio::test]
async fn test_request_response_over_queue() -> anyhow::Result<()> {
    let mut server = JsonRpcServer::new();
    server.add_method(Add)?;
    let client = wire(server);

    for i in 0..5 {
        let result = client
            .request("add", Some(json!({"a": i, "b": 10})), Some(Duration::from_secs(5)))
            .await?;
        assert_eq!(result, json!(i + 10));
    }

    let err = client
        .request("add", Some(json!({"a": i64::MAX, "b": 1})), None)
        .await
        .unwrap_err();
    assert!(matches!(err, JsonRpcClientError::Remote(ref e) if e.code == -1));

    let err = client.request("rpc.internal", None, None).await.unwrap_err();
    assert!(err.is_usage_error());

    let err = client.request("subtract", None, None).await.unwrap_err();
    assert!(matches!(err, JsonRpcClientError::Remote(ref e) if e.code == -32601));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_late_reply_ignored() -> anyhow::Result<()> {
    let release = Arc::new(Notify::new());
    let mut server = JsonRpcServer::new();
    server.add_method(Stall(release.clone()))?;
    server.add_method(Add)?;
    let client = wire(server);

    let err = client
        .request("stall", None, Some(Duration::from_millis(500)))
        .await
        .unwrap_err();
    assert!(matches!(err, JsonRpcClientError::Timeout { id: 1, .. }));

    // The server task is still stuck on request 1; release it so its late
    // reply arrives while request 2 is outstanding.
    let pending = client.call("add", Some(json!({"a": 1, "b": 1})), None)?;
    release.notify_one();
    assert_eq!(pending.await_result().await?, json!(2));
    Ok(())
}
