//! Typed MWA calls over a [`JsonRpcClient`].

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use mwa_common::protocol::{
    decode_base64, decode_base64_all, encode_base64, methods, AppIdentity, AuthorizationResult,
    AuthorizeParams, DeauthorizeParams, GetCapabilitiesResult, ReauthorizeParams,
    SignAndSendOptions, SignAndSendTransactionsParams, SignAndSendTransactionsResult,
    SignMessagesParams, SignPayloadsParams, SignedPayloadsResult,
};
use mwa_rpc::JsonRpcClient;

use crate::error::ClientError;

/// Wallet client for one session.
///
/// Calls are one at a time: starting a call while another is outstanding
/// fails with a usage error from the underlying [`JsonRpcClient`].
#[derive(Clone)]
pub struct MobileWalletAdapterClient {
    rpc: JsonRpcClient,
    timeout: Option<Duration>,
}

impl MobileWalletAdapterClient {
    pub fn new(rpc: JsonRpcClient, timeout: Option<Duration>) -> Self {
        Self { rpc, timeout }
    }

    pub fn rpc(&self) -> &JsonRpcClient {
        &self.rpc
    }

    async fn invoke<P, R>(&self, method: &str, params: &P) -> Result<R, ClientError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|e| ClientError::InvalidArgument(e.to_string()))?;
        debug!(method, "calling wallet");
        let value = self.rpc.request(method, Some(params), self.timeout).await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidResult(format!("{method}: {e}")))
    }

    /// Request authorization. With `params.auth_token` set, the wallet
    /// treats this as a reauthorization.
    pub async fn authorize(
        &self,
        params: &AuthorizeParams,
    ) -> Result<AuthorizationResult, ClientError> {
        params.identity.validate().map_err(ClientError::InvalidArgument)?;
        if let Some(addresses) = &params.addresses {
            decode_base64_all(addresses).map_err(|i| {
                ClientError::InvalidArgument(format!("address {i} is not valid base64"))
            })?;
        }
        let result = self.invoke(methods::AUTHORIZE, params).await?;
        check_authorization(result)
    }

    pub async fn reauthorize(
        &self,
        identity: &AppIdentity,
        auth_token: &str,
    ) -> Result<AuthorizationResult, ClientError> {
        identity.validate().map_err(ClientError::InvalidArgument)?;
        if auth_token.is_empty() {
            return Err(ClientError::InvalidArgument("auth_token is empty".into()));
        }
        let params = ReauthorizeParams {
            identity: identity.clone(),
            auth_token: auth_token.to_string(),
        };
        let result = self.invoke(methods::REAUTHORIZE, &params).await?;
        check_authorization(result)
    }

    pub async fn deauthorize(&self, auth_token: &str) -> Result<(), ClientError> {
        if auth_token.is_empty() {
            return Err(ClientError::InvalidArgument("auth_token is empty".into()));
        }
        let params = DeauthorizeParams {
            auth_token: auth_token.to_string(),
        };
        let _: serde_json::Value = self.invoke(methods::DEAUTHORIZE, &params).await?;
        Ok(())
    }

    pub async fn get_capabilities(&self) -> Result<GetCapabilitiesResult, ClientError> {
        self.invoke(methods::GET_CAPABILITIES, &serde_json::json!({}))
            .await
    }

    /// Returns the signed transactions, one per payload.
    pub async fn sign_transactions(
        &self,
        payloads: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, ClientError> {
        let params = SignPayloadsParams {
            payloads: encode_payloads(payloads)?,
            auth_token: None,
        };
        let result: SignedPayloadsResult = self.invoke(methods::SIGN_TRANSACTIONS, &params).await?;
        decode_outputs("signed_payloads", &result.signed_payloads, payloads.len())
    }

    /// Sign `payloads` with the accounts in `addresses`.
    pub async fn sign_messages(
        &self,
        payloads: &[Vec<u8>],
        addresses: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, ClientError> {
        if addresses.is_empty() {
            return Err(ClientError::InvalidArgument("addresses must not be empty".into()));
        }
        let params = SignMessagesParams {
            payloads: encode_payloads(payloads)?,
            addresses: addresses.iter().map(|a| encode_base64(a)).collect(),
            auth_token: None,
        };
        let result: SignedPayloadsResult = self.invoke(methods::SIGN_MESSAGES, &params).await?;
        decode_outputs("signed_payloads", &result.signed_payloads, payloads.len())
    }

    /// Returns the transaction signatures, one per payload.
    pub async fn sign_and_send_transactions(
        &self,
        payloads: &[Vec<u8>],
        options: SignAndSendOptions,
    ) -> Result<Vec<Vec<u8>>, ClientError> {
        let params = SignAndSendTransactionsParams {
            payloads: encode_payloads(payloads)?,
            options,
            auth_token: None,
        };
        let result: SignAndSendTransactionsResult = self
            .invoke(methods::SIGN_AND_SEND_TRANSACTIONS, &params)
            .await?;
        decode_outputs("signatures", &result.signatures, payloads.len())
    }
}

fn encode_payloads(payloads: &[Vec<u8>]) -> Result<Vec<String>, ClientError> {
    if payloads.is_empty() {
        return Err(ClientError::InvalidArgument("payloads must not be empty".into()));
    }
    Ok(payloads.iter().map(|p| encode_base64(p)).collect())
}

fn decode_outputs(
    field: &str,
    outputs: &[String],
    expected: usize,
) -> Result<Vec<Vec<u8>>, ClientError> {
    if outputs.len() != expected {
        return Err(ClientError::InvalidResult(format!(
            "expected {expected} {field}, got {}",
            outputs.len()
        )));
    }
    decode_base64_all(outputs)
        .map_err(|i| ClientError::InvalidResult(format!("{field}[{i}] is not valid base64")))
}

fn check_authorization(result: AuthorizationResult) -> Result<AuthorizationResult, ClientError> {
    if result.auth_token.is_empty() {
        return Err(ClientError::InvalidResult("empty auth_token".into()));
    }
    if result.accounts.is_empty() {
        return Err(ClientError::InvalidResult("no accounts authorized".into()));
    }
    if let Some(i) = result
        .accounts
        .iter()
        .position(|a| decode_base64(&a.address).is_err())
    {
        return Err(ClientError::InvalidResult(format!(
            "accounts[{i}].address is not valid base64"
        )));
    }
    Ok(result)
}
