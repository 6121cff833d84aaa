//! Per-(user, service) credential provider: the storage-backed
//! implementation of the capability contract the remote tool client drives.
//!
//! Every side effect lands in the [`CredentialStore`]; nothing here touches
//! the network. In particular `begin_authorization` only records the
//! authorization URL so the chat layer can deliver it — the browser is the
//! user's problem.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::auth::pkce;
use crate::remote::oauth::OAuthProvider;
use crate::store::CredentialStore;
use crate::types::{ClientRegistration, OAuthTokens};

pub struct CredentialProvider {
    store: Arc<CredentialStore>,
    user: String,
    service: String,
    redirect_uri: String,
    /// State of the pending flow this provider belongs to, when one exists.
    flow_state: Option<String>,
}

impl CredentialProvider {
    pub fn new(
        store: Arc<CredentialStore>,
        user: &str,
        service: &str,
        redirect_uri: String,
        flow_state: Option<String>,
    ) -> Self {
        Self {
            store,
            user: user.to_string(),
            service: service.to_string(),
            redirect_uri,
            flow_state,
        }
    }
}

#[async_trait]
impl OAuthProvider for CredentialProvider {
    fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    fn flow_state(&self) -> String {
        self.flow_state.clone().unwrap_or_else(pkce::generate_state)
    }

    async fn client_registration(&self) -> Option<ClientRegistration> {
        self.store.get_client_registration(&self.user, &self.service)
    }

    async fn save_client_registration(&self, registration: ClientRegistration) {
        self.store
            .save_client_registration(&self.user, &self.service, registration);
    }

    async fn tokens(&self) -> Option<OAuthTokens> {
        self.store.get_tokens(&self.user, &self.service)
    }

    async fn save_tokens(&self, tokens: OAuthTokens) {
        self.store.save_tokens(&self.user, &self.service, tokens);
    }

    async fn code_verifier(&self) -> Option<String> {
        self.store.get_pkce_verifier(&self.user, &self.service)
    }

    async fn save_code_verifier(&self, verifier: String) {
        self.store
            .save_pkce_verifier(&self.user, &self.service, verifier);
    }

    async fn begin_authorization(&self, url: String) {
        debug!(user = %self.user, service = %self.service, "captured authorization redirect");
        self.store
            .set_pending_auth_url(&self.user, &self.service, url);
    }
}
