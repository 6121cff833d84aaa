//! In-memory credential store: the single source of truth for user sessions,
//! per-(user, service) OAuth material, dynamically registered client
//! identities, and pending login flows keyed by opaque state tokens.
//!
//! Backed by [`DashMap`], so operations lock a single entry rather than the
//! whole map and cross-user operations never serialize against each other.
//! Everything here is volatile bookkeeping: no network I/O, and no map guard
//! is ever held across an await point.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

use crate::types::{ChatContext, ClientRegistration, OAuthTokens};

/// Per-user session state, created on first interaction and kept for the
/// lifetime of the process.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub user_id: String,
    /// Chat-surface identity, stored verbatim and never parsed.
    pub chat_user: String,
    pub credentials: HashMap<String, CredentialRecord>,
    pub registrations: HashMap<String, ClientRegistration>,
    pub authenticating: bool,
    pub pending_service: Option<String>,
    pub pending_auth_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl UserSession {
    fn new(user_id: &str, chat_user: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            chat_user: chat_user.to_string(),
            credentials: HashMap::new(),
            registrations: HashMap::new(),
            authenticating: false,
            pending_service: None,
            pending_auth_url: None,
            created_at: now,
            last_active_at: now,
        }
    }
}

/// OAuth material for one (user, service) pair. `tokens` being present is
/// what "authenticated" means for that pair.
#[derive(Debug, Clone, Default)]
pub struct CredentialRecord {
    pub tokens: Option<OAuthTokens>,
    pub pkce_verifier: Option<String>,
    pub authenticated_at: Option<DateTime<Utc>>,
}

/// A login flow awaiting its browser redirect. Keyed by the opaque state
/// token, which is the only correlation the callback carries.
#[derive(Debug, Clone)]
pub struct PendingOAuthFlow {
    pub user_id: String,
    pub chat_context: ChatContext,
    pub service: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingOAuthFlow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

pub struct CredentialStore {
    sessions: DashMap<String, UserSession>,
    pending: DashMap<String, PendingOAuthFlow>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Create the session on first interaction, touch it afterwards.
    pub fn get_or_create_session(&self, user: &str, chat_user: &str) -> UserSession {
        let mut entry = self
            .sessions
            .entry(user.to_string())
            .or_insert_with(|| UserSession::new(user, chat_user));
        entry.last_active_at = Utc::now();
        entry.clone()
    }

    /// Run `f` under the per-user entry guard, creating the session first if
    /// it does not exist yet.
    fn with_session<T>(&self, user: &str, f: impl FnOnce(&mut UserSession) -> T) -> T {
        let mut entry = self
            .sessions
            .entry(user.to_string())
            .or_insert_with(|| UserSession::new(user, user));
        f(&mut entry)
    }

    /// Persist a token set and clear the in-flight authenticating marker for
    /// that service inside the same entry guard, so no reader can observe
    /// tokens saved while the user still looks mid-login.
    pub fn save_tokens(&self, user: &str, service: &str, tokens: OAuthTokens) {
        self.with_session(user, |session| {
            let record = session.credentials.entry(service.to_string()).or_default();
            record.tokens = Some(tokens);
            record.authenticated_at = Some(Utc::now());

            if session.pending_service.as_deref() == Some(service) {
                session.pending_service = None;
                session.pending_auth_url = None;
                session.authenticating = false;
            }
            session.last_active_at = Utc::now();
        });
        debug!(user, service, "tokens saved");
    }

    pub fn get_tokens(&self, user: &str, service: &str) -> Option<OAuthTokens> {
        self.sessions
            .get(user)
            .and_then(|s| s.credentials.get(service).and_then(|r| r.tokens.clone()))
    }

    pub fn clear_tokens(&self, user: &str, service: &str) {
        if let Some(mut session) = self.sessions.get_mut(user) {
            if let Some(record) = session.credentials.get_mut(service) {
                record.tokens = None;
                record.pkce_verifier = None;
                record.authenticated_at = None;
            }
        }
        debug!(user, service, "tokens cleared");
    }

    pub fn save_client_registration(
        &self,
        user: &str,
        service: &str,
        registration: ClientRegistration,
    ) {
        self.with_session(user, |session| {
            session
                .registrations
                .insert(service.to_string(), registration);
        });
    }

    pub fn get_client_registration(&self, user: &str, service: &str) -> Option<ClientRegistration> {
        self.sessions
            .get(user)
            .and_then(|s| s.registrations.get(service).cloned())
    }

    pub fn save_pkce_verifier(&self, user: &str, service: &str, verifier: String) {
        self.with_session(user, |session| {
            session
                .credentials
                .entry(service.to_string())
                .or_default()
                .pkce_verifier = Some(verifier);
        });
    }

    pub fn get_pkce_verifier(&self, user: &str, service: &str) -> Option<String> {
        self.sessions.get(user).and_then(|s| {
            s.credentials
                .get(service)
                .and_then(|r| r.pkce_verifier.clone())
        })
    }

    /// Mark the session as mid-login for `service`.
    pub fn mark_authenticating(&self, user: &str, service: &str) {
        self.with_session(user, |session| {
            session.authenticating = true;
            session.pending_service = Some(service.to_string());
        });
    }

    /// Record the authorization URL a remote service redirected to, so the
    /// chat layer can deliver it to the user.
    pub fn set_pending_auth_url(&self, user: &str, service: &str, url: String) {
        self.with_session(user, |session| {
            session.authenticating = true;
            session.pending_service = Some(service.to_string());
            session.pending_auth_url = Some(url);
        });
    }

    pub fn get_pending_auth_url(&self, user: &str) -> Option<String> {
        self.sessions
            .get(user)
            .and_then(|s| s.pending_auth_url.clone())
    }

    pub fn clear_pending_auth(&self, user: &str) {
        if let Some(mut session) = self.sessions.get_mut(user) {
            session.authenticating = false;
            session.pending_service = None;
            session.pending_auth_url = None;
        }
    }

    pub fn is_authenticated(&self, user: &str, service: &str) -> bool {
        self.get_tokens(user, service).is_some()
    }

    pub fn list_authenticated_services(&self, user: &str) -> Vec<String> {
        let mut services: Vec<String> = self
            .sessions
            .get(user)
            .map(|s| {
                s.credentials
                    .iter()
                    .filter(|(_, record)| record.tokens.is_some())
                    .map(|(service, _)| service.clone())
                    .collect()
            })
            .unwrap_or_default();
        services.sort();
        services
    }

    /// Index a login flow under its state token. The state is fresh and
    /// unguessable, so repeated registration of the same state does not
    /// happen in practice; last-write-wins if it does.
    pub fn register_pending_flow(&self, flow: PendingOAuthFlow) {
        debug!(user = %flow.user_id, service = %flow.service, "pending flow registered");
        self.pending.insert(flow.state.clone(), flow);
    }

    /// Non-consuming peek, for diagnostics and tests.
    pub fn get_pending_flow(&self, state: &str) -> Option<PendingOAuthFlow> {
        self.pending.get(state).map(|entry| entry.value().clone())
    }

    /// Consume a pending flow. The removal is atomic: under concurrent
    /// duplicate callbacks exactly one caller receives the record.
    pub fn remove_pending_flow(&self, state: &str) -> Option<PendingOAuthFlow> {
        self.pending.remove(state).map(|(_, flow)| flow)
    }

    /// Drop expired flows. Expiry is enforced lazily at resolution time;
    /// this only reclaims memory from flows whose redirect never arrived.
    pub fn sweep_expired_flows(&self, now: DateTime<Utc>) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, flow| !flow.is_expired(now));
        before - self.pending.len()
    }

    pub fn pending_flow_count(&self) -> usize {
        self.pending.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}
