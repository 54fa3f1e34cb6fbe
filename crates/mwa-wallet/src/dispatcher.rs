//! MWA method dispatch for one wallet session.
//!
//! Every method is an [`RpcMethod`] sharing the session context. The
//! context remembers which authorization the session established, so
//! privileged methods work without the client resending its token.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use mwa_common::protocol::{
    decode_base64, decode_base64_all, encode_base64, error_codes, features, methods,
    AppIdentity, AuthorizationResult, AuthorizeParams, DeauthorizeParams, GetCapabilitiesResult,
    ReauthorizeParams, SignAndSendTransactionsParams, SignAndSendTransactionsResult,
    SignInResult, SignMessagesParams, SignPayloadsParams, SignedPayloadsResult,
};
use mwa_rpc::{JsonRpcError, JsonRpcServer, JsonRpcServerError, RpcMethod};

use crate::auth::{AuthRecord, AuthRepository, IdentityRecord};
use crate::config::WalletConfig;
use crate::delegate::{
    AuthorizeDecision, AuthorizeRequest, DelegateError, SignAndSendTransactionsRequest,
    SignMessagesRequest, SignTransactionsRequest, WalletDelegate,
};
use crate::error::AuthRepoError;

fn authorization_failed(message: &str) -> JsonRpcError {
    JsonRpcError::new(error_codes::AUTHORIZATION_FAILED, message)
}

fn repository_error(e: AuthRepoError) -> JsonRpcError {
    warn!("authorization repository failure: {e}");
    JsonRpcError::internal_error("authorization repository unavailable")
}

fn same_identity(record: &IdentityRecord, identity: &AppIdentity) -> bool {
    record.name == identity.name && record.uri == identity.uri && record.icon == identity.icon
}

/// Check count and encoding of request payloads.
fn decode_payloads(payloads: &[String], max: u32) -> Result<Vec<Vec<u8>>, JsonRpcError> {
    if payloads.is_empty() {
        return Err(JsonRpcError::invalid_params("payloads must not be empty"));
    }
    if payloads.len() > max as usize {
        return Err(DelegateError::TooManyPayloads.to_rpc_error());
    }
    decode_base64_all(payloads).map_err(|_| {
        let valid = payloads.iter().map(|p| decode_base64(p).is_ok()).collect();
        DelegateError::InvalidPayloads { valid }.to_rpc_error()
    })
}

fn expect_outputs(outputs: &[Vec<u8>], expected: usize) -> Result<(), JsonRpcError> {
    if outputs.len() != expected {
        warn!(got = outputs.len(), expected, "wallet returned wrong number of outputs");
        return Err(JsonRpcError::internal_error(
            "wallet returned wrong number of outputs",
        ));
    }
    Ok(())
}

struct SessionContext {
    repository: Arc<AuthRepository>,
    delegate: Arc<dyn WalletDelegate>,
    config: WalletConfig,
    authorization: Mutex<Option<i64>>,
}

impl SessionContext {
    fn session_authorization(&self) -> Option<i64> {
        *self.authorization.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_session_authorization(&self, auth_record_id: Option<i64>) {
        *self.authorization.lock().unwrap_or_else(PoisonError::into_inner) = auth_record_id;
    }

    fn authorization_result(
        &self,
        record: &AuthRecord,
        sign_in_result: Option<SignInResult>,
    ) -> Result<AuthorizationResult, JsonRpcError> {
        let auth_token = self
            .repository
            .to_auth_token(record)
            .map_err(repository_error)?;
        self.set_session_authorization(Some(record.id));
        Ok(AuthorizationResult {
            auth_token,
            accounts: record.authorized_accounts(),
            wallet_uri_base: record.wallet_uri_base.clone(),
            sign_in_result,
        })
    }

    async fn reauthorize(
        &self,
        identity: &AppIdentity,
        auth_token: &str,
    ) -> Result<AuthorizationResult, JsonRpcError> {
        let Some(record) = self
            .repository
            .from_auth_token(auth_token)
            .map_err(repository_error)?
        else {
            return Err(authorization_failed("auth token not valid"));
        };
        if !same_identity(&record.identity, identity) {
            warn!(auth_id = record.id, "reauthorize with a different identity");
            return Err(authorization_failed("auth token not valid"));
        }
        if !self.delegate.reauthorize(&record, identity).await {
            info!(auth_id = record.id, "wallet declined reauthorization");
            return Err(authorization_failed("reauthorization declined"));
        }

        let Some(fresh) = self.repository.reissue(&record).map_err(repository_error)? else {
            return Err(authorization_failed("auth token not valid"));
        };
        self.authorization_result(&fresh, None)
    }

    /// The active authorization a privileged request runs under.
    fn authorized(&self, auth_token: Option<&str>) -> Result<AuthRecord, JsonRpcError> {
        let record = match auth_token {
            Some(token) => self
                .repository
                .from_auth_token(token)
                .map_err(repository_error)?,
            None => self
                .session_authorization()
                .and_then(|id| self.repository.get(id)),
        };

        match record {
            Some(record) if record.is_active(self.repository.now()) => Ok(record),
            Some(record) => {
                debug!(auth_id = record.id, "authorization no longer active");
                Err(authorization_failed("not authorized"))
            }
            None => Err(authorization_failed("not authorized")),
        }
    }
}

struct Authorize(Arc<SessionContext>);

#[async_trait::async_trait]
impl RpcMethod for Authorize {
    const NAME: &'static str = methods::AUTHORIZE;
    type Params = AuthorizeParams;
    type Result = AuthorizationResult;

    async fn call(&self, params: AuthorizeParams) -> Result<AuthorizationResult, JsonRpcError> {
        let ctx = &self.0;
        params
            .identity
            .validate()
            .map_err(JsonRpcError::invalid_params)?;

        let chain = params
            .resolved_chain()
            .map_err(|e| JsonRpcError::new(error_codes::CHAIN_NOT_SUPPORTED, e))?;
        if !ctx.config.supports_chain(&chain) {
            return Err(JsonRpcError::new(
                error_codes::CHAIN_NOT_SUPPORTED,
                format!("chain not supported: {chain}"),
            ));
        }

        if let Some(token) = &params.auth_token {
            return ctx.reauthorize(&params.identity, token).await;
        }

        let addresses = match &params.addresses {
            Some(addresses) => decode_base64_all(addresses).map_err(|i| {
                JsonRpcError::invalid_params(format!("address {i} is not valid base64"))
            })?,
            None => Vec::new(),
        };
        let request = AuthorizeRequest {
            identity: params.identity,
            chain,
            features: params.features.unwrap_or_default(),
            addresses,
            sign_in_payload: params.sign_in_payload,
        };

        match ctx.delegate.authorize(&request).await {
            AuthorizeDecision::Declined => {
                info!(name = ?request.identity.name, "authorization declined");
                Err(authorization_failed("authorization declined"))
            }
            AuthorizeDecision::Approved { accounts, .. } if accounts.is_empty() => {
                warn!("wallet approved authorization without accounts");
                Err(JsonRpcError::internal_error("no accounts authorized"))
            }
            AuthorizeDecision::Approved {
                accounts,
                wallet_uri_base,
                scope,
                sign_in_result,
            } => {
                let record = ctx
                    .repository
                    .issue(
                        &request.identity,
                        &request.chain,
                        accounts,
                        wallet_uri_base,
                        scope,
                    )
                    .map_err(repository_error)?;
                ctx.authorization_result(&record, sign_in_result)
            }
        }
    }
}

struct Reauthorize(Arc<SessionContext>);

#[async_trait::async_trait]
impl RpcMethod for Reauthorize {
    const NAME: &'static str = methods::REAUTHORIZE;
    type Params = ReauthorizeParams;
    type Result = AuthorizationResult;

    async fn call(&self, params: ReauthorizeParams) -> Result<AuthorizationResult, JsonRpcError> {
        params
            .identity
            .validate()
            .map_err(JsonRpcError::invalid_params)?;
        self.0.reauthorize(&params.identity, &params.auth_token).await
    }
}

struct Deauthorize(Arc<SessionContext>);

#[async_trait::async_trait]
impl RpcMethod for Deauthorize {
    const NAME: &'static str = methods::DEAUTHORIZE;
    type Params = DeauthorizeParams;
    type Result = Value;

    async fn call(&self, params: DeauthorizeParams) -> Result<Value, JsonRpcError> {
        let ctx = &self.0;
        // Unknown and invalid tokens succeed too.
        if let Some(record) = ctx
            .repository
            .from_auth_token(&params.auth_token)
            .map_err(repository_error)?
        {
            ctx.repository
                .revoke(record.id)
                .map_err(repository_error)?;
            if ctx.session_authorization() == Some(record.id) {
                ctx.set_session_authorization(None);
            }
            info!(auth_id = record.id, "deauthorized");
        }
        Ok(json!({}))
    }
}

struct GetCapabilities(Arc<SessionContext>);

#[async_trait::async_trait]
impl RpcMethod for GetCapabilities {
    const NAME: &'static str = methods::GET_CAPABILITIES;
    type Params = Value;
    type Result = GetCapabilitiesResult;

    async fn call(&self, _params: Value) -> Result<GetCapabilitiesResult, JsonRpcError> {
        let config = &self.0.config;
        Ok(GetCapabilitiesResult {
            max_transactions_per_request: config.max_transactions_per_request,
            max_messages_per_request: config.max_messages_per_request,
            supported_transaction_versions: config.supported_transaction_versions.clone(),
            features: config.advertised_features(),
            supports_clone_authorization: config.supports_feature(features::CLONE_AUTHORIZATION),
            supports_sign_and_send_transactions: config.supports_sign_and_send_transactions,
        })
    }
}

struct SignTransactions(Arc<SessionContext>);

#[async_trait::async_trait]
impl RpcMethod for SignTransactions {
    const NAME: &'static str = methods::SIGN_TRANSACTIONS;
    type Params = SignPayloadsParams;
    type Result = SignedPayloadsResult;

    async fn call(&self, params: SignPayloadsParams) -> Result<SignedPayloadsResult, JsonRpcError> {
        let ctx = &self.0;
        let authorization = ctx.authorized(params.auth_token.as_deref())?;
        let payloads =
            decode_payloads(&params.payloads, ctx.config.max_transactions_per_request)?;
        let expected = payloads.len();

        let request = SignTransactionsRequest {
            authorization,
            payloads,
        };
        let signed = ctx
            .delegate
            .sign_transactions(&request)
            .await
            .map_err(|e| e.to_rpc_error())?;
        expect_outputs(&signed, expected)?;

        Ok(SignedPayloadsResult {
            signed_payloads: signed.iter().map(|p| encode_base64(p)).collect(),
        })
    }
}

struct SignMessages(Arc<SessionContext>);

#[async_trait::async_trait]
impl RpcMethod for SignMessages {
    const NAME: &'static str = methods::SIGN_MESSAGES;
    type Params = SignMessagesParams;
    type Result = SignedPayloadsResult;

    async fn call(&self, params: SignMessagesParams) -> Result<SignedPayloadsResult, JsonRpcError> {
        let ctx = &self.0;
        let authorization = ctx.authorized(params.auth_token.as_deref())?;
        let payloads = decode_payloads(&params.payloads, ctx.config.max_messages_per_request)?;

        if params.addresses.is_empty() {
            return Err(JsonRpcError::invalid_params("addresses must not be empty"));
        }
        let addresses = decode_base64_all(&params.addresses).map_err(|i| {
            JsonRpcError::invalid_params(format!("address {i} is not valid base64"))
        })?;
        if let Some(i) = addresses.iter().position(|a| !authorization.has_account(a)) {
            return Err(JsonRpcError::invalid_params(format!(
                "address {i} is not authorized"
            )));
        }
        let expected = payloads.len();

        let request = SignMessagesRequest {
            authorization,
            payloads,
            addresses,
        };
        let signed = ctx
            .delegate
            .sign_messages(&request)
            .await
            .map_err(|e| e.to_rpc_error())?;
        expect_outputs(&signed, expected)?;

        Ok(SignedPayloadsResult {
            signed_payloads: signed.iter().map(|p| encode_base64(p)).collect(),
        })
    }
}

struct SignAndSendTransactions(Arc<SessionContext>);

#[async_trait::async_trait]
impl RpcMethod for SignAndSendTransactions {
    const NAME: &'static str = methods::SIGN_AND_SEND_TRANSACTIONS;
    type Params = SignAndSendTransactionsParams;
    type Result = SignAndSendTransactionsResult;

    async fn call(
        &self,
        params: SignAndSendTransactionsParams,
    ) -> Result<SignAndSendTransactionsResult, JsonRpcError> {
        let ctx = &self.0;
        let authorization = ctx.authorized(params.auth_token.as_deref())?;
        let payloads =
            decode_payloads(&params.payloads, ctx.config.max_transactions_per_request)?;
        let expected = payloads.len();

        let request = SignAndSendTransactionsRequest {
            authorization,
            payloads,
            options: params.options,
        };
        let signatures = ctx
            .delegate
            .sign_and_send_transactions(&request)
            .await
            .map_err(|e| e.to_rpc_error())?;
        expect_outputs(&signatures, expected)?;

        Ok(SignAndSendTransactionsResult {
            signatures: signatures.iter().map(|s| encode_base64(s)).collect(),
        })
    }
}

/// Per-session MWA request handler.
pub struct MwaDispatcher {
    server: JsonRpcServer,
    context: Arc<SessionContext>,
}

impl MwaDispatcher {
    pub fn new(
        repository: Arc<AuthRepository>,
        delegate: Arc<dyn WalletDelegate>,
        config: WalletConfig,
    ) -> Result<Self, JsonRpcServerError> {
        let sign_and_send = config.supports_sign_and_send_transactions;
        let context = Arc::new(SessionContext {
            repository,
            delegate,
            config,
            authorization: Mutex::new(None),
        });

        let mut server = JsonRpcServer::new();
        server.add_method(Authorize(context.clone()))?;
        server.add_method(Reauthorize(context.clone()))?;
        server.add_method(Deauthorize(context.clone()))?;
        server.add_method(GetCapabilities(context.clone()))?;
        server.add_method(SignTransactions(context.clone()))?;
        server.add_method(SignMessages(context.clone()))?;
        if sign_and_send {
            server.add_method(SignAndSendTransactions(context.clone()))?;
        }

        Ok(Self { server, context })
    }

    /// Handle one decrypted request and return the reply, if any.
    pub async fn handle_message(&self, message: &[u8]) -> Option<Vec<u8>> {
        self.server.handle_message(message).await
    }

    /// The authorization this session established, if any.
    pub fn session_authorization(&self) -> Option<i64> {
        self.context.session_authorization()
    }
}
