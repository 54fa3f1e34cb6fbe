//! JSON-RPC server: envelope validation and method dispatch.

use std::collections::HashMap;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::JsonRpcServerError;
use crate::message::{
    is_valid_method_name, JsonRpcError, JsonRpcId, JsonRpcResponse, JSONRPC_VERSION,
};

/// A typed method. Params are deserialized before `call`; a params value
/// that does not fit `Params` is rejected with invalid params.
#[async_trait::async_trait]
pub trait RpcMethod: Send + Sync + 'static {
    const NAME: &'static str;
    type Params: DeserializeOwned + Send;
    type Result: Serialize + Send;

    async fn call(&self, params: Self::Params) -> Result<Self::Result, JsonRpcError>;
}

#[async_trait::async_trait]
trait ErasedHandler: Send + Sync {
    async fn call(&self, params: Option<Value>) -> Result<Value, JsonRpcError>;
}

#[async_trait::async_trait]
impl<T: RpcMethod> ErasedHandler for T {
    async fn call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        // Absent params read as an empty object.
        let params = params.unwrap_or_else(|| Value::Object(Default::default()));
        let typed_params: T::Params = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;

        let result = RpcMethod::call(self, typed_params).await?;
        serde_json::to_value(result)
            .map_err(|e| JsonRpcError::internal_error(format!("serialize result: {e}")))
    }
}

/// Method table plus request handling.
pub struct JsonRpcServer {
    methods: HashMap<&'static str, Box<dyn ErasedHandler>>,
}

impl Default for JsonRpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRpcServer {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    pub fn add_method<T: RpcMethod>(&mut self, method: T) -> Result<(), JsonRpcServerError> {
        if !is_valid_method_name(T::NAME) {
            return Err(JsonRpcServerError::ReservedMethod(T::NAME.to_string()));
        }
        if self.methods.contains_key(T::NAME) {
            return Err(JsonRpcServerError::DuplicateMethod(T::NAME.to_string()));
        }
        self.methods.insert(T::NAME, Box::new(method));
        Ok(())
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Handle one inbound message and return the reply, if any.
    ///
    /// Notifications (no `id`) never get a reply, even when they fail.
    pub async fn handle_message(&self, message: &[u8]) -> Option<Vec<u8>> {
        let value: Value = match serde_json::from_slice(message) {
            Ok(v) => v,
            Err(e) => {
                debug!("unparseable request: {e}");
                return encode(JsonRpcResponse::failure(
                    JsonRpcId::Null,
                    JsonRpcError::parse_error(e.to_string()),
                ));
            }
        };

        let Value::Object(mut object) = value else {
            return encode(JsonRpcResponse::failure(
                JsonRpcId::Null,
                JsonRpcError::invalid_request("request must be an object"),
            ));
        };

        let id = match object.remove("id") {
            None => None,
            Some(Value::Null) => Some(JsonRpcId::Null),
            Some(Value::String(s)) => Some(JsonRpcId::Str(s)),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(n) => Some(JsonRpcId::Num(n)),
                None => {
                    return encode(JsonRpcResponse::failure(
                        JsonRpcId::Null,
                        JsonRpcError::invalid_request("id must be an integer or a string"),
                    ))
                }
            },
            Some(_) => {
                return encode(JsonRpcResponse::failure(
                    JsonRpcId::Null,
                    JsonRpcError::invalid_request("id must be an integer or a string"),
                ))
            }
        };

        let outcome = self.dispatch(object).await;

        let Some(id) = id else {
            if let Err(e) = outcome {
                debug!(code = e.code, "notification failed: {}", e.message);
            }
            return None;
        };

        match outcome {
            Ok(result) => encode(JsonRpcResponse::success(id, result)),
            Err(error) => encode(JsonRpcResponse::failure(id, error)),
        }
    }

    async fn dispatch(&self, mut object: serde_json::Map<String, Value>) -> Result<Value, JsonRpcError> {
        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(JsonRpcError::invalid_request("jsonrpc must be \"2.0\""));
        }

        let method = match object.remove("method") {
            Some(Value::String(method)) => method,
            _ => return Err(JsonRpcError::invalid_request("method must be a string")),
        };
        if !is_valid_method_name(&method) {
            return Err(JsonRpcError::method_not_found(&method));
        }

        let params = match object.remove("params") {
            None => None,
            Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p),
            Some(_) => {
                return Err(JsonRpcError::invalid_params(
                    "params must be an object or an array",
                ))
            }
        };

        let Some(handler) = self.methods.get(method.as_str()) else {
            return Err(JsonRpcError::method_not_found(&method));
        };

        debug!(%method, "dispatching");
        handler.call(params).await
    }
}

fn encode(response: JsonRpcResponse) -> Option<Vec<u8>> {
    match serde_json::to_vec(&response) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("failed to serialize response: {e}");
            None
        }
    }
}
