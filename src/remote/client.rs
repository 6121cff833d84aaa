//! OAuth-aware remote tool client: JSON-RPC 2.0 over HTTP.
//!
//! The client owns the protocol exchange and nothing else. All credential
//! state flows through the [`OAuthProvider`] it was handed: tokens for the
//! Bearer header, the stored registration for refresh, and on an auth
//! challenge the whole authorization preamble (dynamic registration, PKCE,
//! redirect capture) before the connection attempt is failed back to the
//! caller.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::pkce;
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::metrics::METRICS;
use crate::remote::oauth::{self, OAuthProvider};

/// Refresh the access token this many seconds before it expires.
const TOKEN_REFRESH_BUFFER_SECS: i64 = 300;

/// A tool exposed by the remote service.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

enum RpcFailure {
    /// The service answered 401/403: it wants authorization, not a retry.
    Unauthorized(reqwest::StatusCode),
    Other(Error),
}

pub struct ToolClient {
    service: String,
    config: ServiceConfig,
    client_name: String,
    http: reqwest::Client,
    provider: Arc<dyn OAuthProvider>,
    connection_id: Uuid,
    next_id: AtomicU64,
}

impl ToolClient {
    /// Open an authenticated connection with an `initialize` handshake.
    ///
    /// On an auth challenge the provider is driven through the authorization
    /// preamble — ensure a client registration, persist a fresh PKCE
    /// verifier, capture the authorization URL — and the attempt fails with
    /// a connection error. Classifying that failure is the caller's job.
    pub async fn connect(
        http: reqwest::Client,
        service: &str,
        config: &ServiceConfig,
        client_name: &str,
        provider: Arc<dyn OAuthProvider>,
    ) -> Result<Self> {
        let client = Self {
            service: service.to_string(),
            config: config.clone(),
            client_name: client_name.to_string(),
            http,
            provider,
            connection_id: Uuid::new_v4(),
            next_id: AtomicU64::new(1),
        };

        let params = json!({
            "protocolVersion": "1.0",
            "clientInfo": { "name": client.client_name, "version": crate::VERSION },
            "capabilities": {},
        });

        match client.rpc_once("initialize", params).await {
            Ok(_) => {
                METRICS
                    .connect_attempts_total
                    .with_label_values(&[service, "success"])
                    .inc();
                debug!(service, connection_id = %client.connection_id, "tool connection established");
                Ok(client)
            }
            Err(RpcFailure::Unauthorized(status)) => {
                METRICS
                    .connect_attempts_total
                    .with_label_values(&[service, "unauthorized"])
                    .inc();
                client.authorize().await?;
                Err(client.unauthorized(status))
            }
            Err(RpcFailure::Other(err)) => {
                METRICS
                    .connect_attempts_total
                    .with_label_values(&[service, "error"])
                    .inc();
                Err(err)
            }
        }
    }

    /// The authorization preamble: make sure a client identity exists, bind
    /// a fresh PKCE verifier to this attempt, and hand the authorization URL
    /// to the provider for out-of-band delivery.
    async fn authorize(&self) -> Result<()> {
        let registration = match self.provider.client_registration().await {
            Some(registration) => registration,
            None => {
                let registration = oauth::register_client(
                    &self.http,
                    &self.config,
                    &self.client_name,
                    self.provider.redirect_uri(),
                )
                .await?;
                self.provider
                    .save_client_registration(registration.clone())
                    .await;
                registration
            }
        };

        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::code_challenge_s256(&verifier);
        self.provider.save_code_verifier(verifier).await;

        let url = oauth::authorization_url(
            &self.config,
            &registration,
            &challenge,
            &self.provider.flow_state(),
            self.provider.redirect_uri(),
        );
        self.provider.begin_authorization(url).await;
        Ok(())
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let result = self.rpc("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(tools).map_err(|e| Error::Tool(format!("malformed tool list: {e}")))
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let start = Instant::now();
        let result = self
            .rpc("tools/call", json!({ "name": name, "arguments": arguments }))
            .await;

        METRICS
            .tool_call_duration_seconds
            .with_label_values(&[&self.service])
            .observe(start.elapsed().as_secs_f64());
        METRICS
            .tool_calls_total
            .with_label_values(&[&self.service, if result.is_ok() { "success" } else { "error" }])
            .inc();

        result
    }

    /// Best-effort shutdown notification; the server may already be gone.
    pub async fn close(&self) {
        if let Err(err) = self.rpc("shutdown", json!({})).await {
            debug!(service = %self.service, connection_id = %self.connection_id, %err, "shutdown notification failed");
        }
    }

    /// One request, plus a single retry when the failure is transient.
    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        match self.rpc_once(method, params.clone()).await {
            Ok(value) => Ok(value),
            Err(RpcFailure::Unauthorized(status)) => Err(self.unauthorized(status)),
            Err(RpcFailure::Other(err)) if err.is_transient() => {
                warn!(service = %self.service, %err, "transient tool failure, retrying once");
                match self.rpc_once(method, params).await {
                    Ok(value) => Ok(value),
                    Err(RpcFailure::Unauthorized(status)) => Err(self.unauthorized(status)),
                    Err(RpcFailure::Other(err)) => Err(err),
                }
            }
            Err(RpcFailure::Other(err)) => Err(err),
        }
    }

    async fn rpc_once(&self, method: &str, params: Value) -> std::result::Result<Value, RpcFailure> {
        let token = self.access_token().await.map_err(RpcFailure::Other)?;

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut builder = self.http.post(&self.config.endpoint).json(&request);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        let res = builder
            .send()
            .await
            .map_err(|e| RpcFailure::Other(e.into()))?;

        let status = res.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RpcFailure::Unauthorized(status));
        }
        if !status.is_success() {
            // Preserve the reqwest error so upstream 502/503/504 stay
            // classifiable as transient.
            return match res.error_for_status() {
                Err(e) => Err(RpcFailure::Other(e.into())),
                Ok(_) => Err(RpcFailure::Other(Error::Tool(format!(
                    "unexpected status {status}"
                )))),
            };
        }

        let response: RpcResponse = res.json().await.map_err(|e| RpcFailure::Other(e.into()))?;
        if let Some(error) = response.error {
            return Err(RpcFailure::Other(Error::Tool(format!(
                "{} (code {})",
                error.message, error.code
            ))));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Current access token, refreshed through the token endpoint when it is
    /// about to expire and a refresh token is on hand.
    async fn access_token(&self) -> Result<Option<String>> {
        let Some(tokens) = self.provider.tokens().await else {
            return Ok(None);
        };

        if tokens.is_expired(TOKEN_REFRESH_BUFFER_SECS) {
            if let (Some(refresh_token), Some(registration)) = (
                tokens.refresh_token.clone(),
                self.provider.client_registration().await,
            ) {
                debug!(service = %self.service, "access token expiring, refreshing");
                let refreshed = oauth::refresh_tokens(
                    &self.http,
                    &self.config,
                    &registration,
                    &refresh_token,
                )
                .await?;
                self.provider.save_tokens(refreshed.clone()).await;
                return Ok(Some(refreshed.access_token));
            }
        }

        Ok(Some(tokens.access_token))
    }

    fn unauthorized(&self, status: reqwest::StatusCode) -> Error {
        Error::ConnectionFailed {
            service: self.service.clone(),
            reason: format!("unauthorized ({status})"),
        }
    }
}
