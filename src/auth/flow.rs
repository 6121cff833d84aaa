//! Flow coordinator: the single consumer of callback events.
//!
//! Correlates each `(code, state)` pair back to the pending login flow that
//! produced it, enforces expiry, runs the explicit code-for-token exchange,
//! and notifies the chat layer exactly once per resolved flow. A callback by
//! itself never counts as a successful login; tokens must come back from the
//! token endpoint first.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::auth::pkce;
use crate::auth::provider::CredentialProvider;
use crate::clients::ClientManager;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::METRICS;
use crate::remote::oauth::{self, OAuthProvider};
use crate::store::{CredentialStore, PendingOAuthFlow};
use crate::types::ChatContext;

/// `(code, state)` pair published by the callback listener. Carries no user
/// identity; correlation is this module's job.
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub code: String,
    pub state: String,
}

/// Chat-layer notification hook, invoked exactly once per resolved flow.
/// Unknown states produce no notification at all.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthEventHandler: Send + Sync {
    async fn on_auth_complete(
        &self,
        user: &str,
        context: &ChatContext,
        service: &str,
        result: Result<()>,
    );
}

pub struct FlowCoordinator {
    config: Arc<Config>,
    store: Arc<CredentialStore>,
    clients: Arc<ClientManager>,
    handler: Arc<dyn AuthEventHandler>,
    http: reqwest::Client,
}

impl FlowCoordinator {
    pub fn new(
        config: Arc<Config>,
        store: Arc<CredentialStore>,
        clients: Arc<ClientManager>,
        handler: Arc<dyn AuthEventHandler>,
    ) -> Self {
        Self {
            config,
            store,
            clients,
            handler,
            http: reqwest::Client::new(),
        }
    }

    /// Entry point for the chat layer: register a pending flow under a fresh
    /// state token and obtain the authorization URL to deliver to the user.
    ///
    /// The flow is registered before the connection attempt, so the state is
    /// always resolvable by the time the URL can reach a browser. Returns
    /// `None` when the user turned out to be already authenticated.
    pub async fn initiate_login(
        &self,
        user: &str,
        context: ChatContext,
        service: &str,
    ) -> Result<Option<String>> {
        if self.config.service(service).is_none() {
            return Err(Error::UnknownService(service.to_string()));
        }
        self.store.get_or_create_session(user, user);

        let state = pkce::generate_state();
        let now = Utc::now();
        self.store.register_pending_flow(PendingOAuthFlow {
            user_id: user.to_string(),
            chat_context: context,
            service: service.to_string(),
            state: state.clone(),
            created_at: now,
            expires_at: now + Duration::seconds(self.config.oauth.flow_ttl_secs as i64),
        });
        self.store.mark_authenticating(user, service);
        METRICS.flows_initiated_total.inc();
        info!(user, service, "login initiated");

        match self.clients.initiate_auth(user, service, &state).await {
            Ok(Some(url)) => Ok(Some(url)),
            Ok(None) => {
                // Already authenticated by a race; withdraw the flow.
                self.store.remove_pending_flow(&state);
                self.store.clear_pending_auth(user);
                Ok(None)
            }
            Err(err) => {
                self.store.remove_pending_flow(&state);
                self.store.clear_pending_auth(user);
                Err(err)
            }
        }
    }

    /// Single-consumer loop over the callback channel.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<CallbackEvent>) {
        info!("flow coordinator started");
        while let Some(event) = events.recv().await {
            self.handle_callback(event).await;
        }
        info!("callback channel closed, flow coordinator stopping");
    }

    /// Resolve one callback event: Registered -> Resolved | Expired | Unknown.
    pub async fn handle_callback(&self, event: CallbackEvent) {
        // Atomic consume: the removal hands the record to exactly one
        // caller, so duplicate callbacks for the same state fall through to
        // the unknown branch.
        let Some(flow) = self.store.remove_pending_flow(&event.state) else {
            METRICS
                .flows_resolved_total
                .with_label_values(&["unknown"])
                .inc();
            // A replay or a forged request: log and drop, no user-visible
            // effect.
            let err = Error::FlowUnknown { state: event.state };
            warn!(%err, "dropping callback");
            return;
        };

        if flow.is_expired(Utc::now()) {
            METRICS
                .flows_resolved_total
                .with_label_values(&["expired"])
                .inc();
            warn!(user = %flow.user_id, service = %flow.service, "login flow expired");
            self.store.clear_pending_auth(&flow.user_id);
            self.handler
                .on_auth_complete(
                    &flow.user_id,
                    &flow.chat_context,
                    &flow.service,
                    Err(Error::FlowExpired),
                )
                .await;
            return;
        }

        match self.exchange(&flow, &event.code).await {
            Ok(()) => {
                METRICS
                    .flows_resolved_total
                    .with_label_values(&["success"])
                    .inc();
                info!(user = %flow.user_id, service = %flow.service, "login completed");
                self.handler
                    .on_auth_complete(&flow.user_id, &flow.chat_context, &flow.service, Ok(()))
                    .await;
            }
            Err(err) => {
                METRICS
                    .flows_resolved_total
                    .with_label_values(&["exchange_failed"])
                    .inc();
                warn!(user = %flow.user_id, service = %flow.service, %err, "token exchange failed");
                self.store.clear_pending_auth(&flow.user_id);
                self.handler
                    .on_auth_complete(
                        &flow.user_id,
                        &flow.chat_context,
                        &flow.service,
                        Err(Error::ExchangeFailed {
                            reason: err.to_string(),
                        }),
                    )
                    .await;
            }
        }
    }

    /// The explicit code-for-token exchange for a consumed flow. Uses the
    /// client registration and PKCE verifier the connection attempt stored
    /// when it captured the redirect.
    async fn exchange(&self, flow: &PendingOAuthFlow, code: &str) -> Result<()> {
        let service_config = self
            .config
            .service(&flow.service)
            .ok_or_else(|| Error::UnknownService(flow.service.clone()))?;

        let provider = CredentialProvider::new(
            self.store.clone(),
            &flow.user_id,
            &flow.service,
            self.config.redirect_uri(),
            Some(flow.state.clone()),
        );

        let registration =
            provider
                .client_registration()
                .await
                .ok_or_else(|| Error::ExchangeFailed {
                    reason: "no client registration for flow".to_string(),
                })?;
        let verifier = provider
            .code_verifier()
            .await
            .ok_or_else(|| Error::ExchangeFailed {
                reason: "no PKCE verifier for flow".to_string(),
            })?;

        let outcome = oauth::exchange_code(
            &self.http,
            service_config,
            &registration,
            code,
            &verifier,
            provider.redirect_uri(),
        )
        .await;
        METRICS
            .token_exchanges_total
            .with_label_values(&[
                &flow.service,
                if outcome.is_ok() { "success" } else { "error" },
            ])
            .inc();

        provider.save_tokens(outcome?).await;
        Ok(())
    }
}
