//! Remote client manager: owns the cache of live tool connections, one per
//! (user, service) pair, and is the only component that opens or closes
//! them. Other components route through it.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::CredentialProvider;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::METRICS;
use crate::remote::ToolClient;
use crate::store::CredentialStore;
use crate::types::ClientKey;

pub struct ClientManager {
    config: Arc<Config>,
    store: Arc<CredentialStore>,
    http: reqwest::Client,
    clients: DashMap<ClientKey, Arc<ToolClient>>,
    /// Per-key guards so concurrent requests for one key build one
    /// connection, while different keys connect in parallel.
    connect_locks: DashMap<ClientKey, Arc<Mutex<()>>>,
}

impl ClientManager {
    pub fn new(config: Arc<Config>, store: Arc<CredentialStore>) -> Self {
        Self {
            config,
            store,
            http: reqwest::Client::new(),
            clients: DashMap::new(),
            connect_locks: DashMap::new(),
        }
    }

    fn connect_lock(&self, key: &ClientKey) -> Arc<Mutex<()>> {
        self.connect_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Cached client for the pair, or a fresh connection when the user
    /// already holds tokens. Never triggers a login: without tokens this
    /// fails with `AuthenticationRequired` and the chat layer decides
    /// whether to start one.
    pub async fn get_client(&self, user: &str, service: &str) -> Result<Arc<ToolClient>> {
        let key = ClientKey::new(user, service);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let service_config = self
            .config
            .service(service)
            .ok_or_else(|| Error::UnknownService(service.to_string()))?
            .clone();

        if self.store.get_tokens(user, service).is_none() {
            return Err(Error::AuthenticationRequired {
                service: service.to_string(),
            });
        }

        let lock = self.connect_lock(&key);
        let _guard = lock.lock().await;
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let provider = Arc::new(CredentialProvider::new(
            self.store.clone(),
            user,
            service,
            self.config.redirect_uri(),
            None,
        ));

        let url_before = self.store.get_pending_auth_url(user);
        match ToolClient::connect(
            self.http.clone(),
            service,
            &service_config,
            &self.config.oauth.client_name,
            provider,
        )
        .await
        {
            Ok(client) => {
                let client = Arc::new(client);
                self.clients.insert(key, client.clone());
                METRICS.active_clients.set(self.clients.len() as f64);
                info!(user, service, "tool client connected");
                Ok(client)
            }
            Err(err) => {
                // A freshly captured authorization URL means the remote side
                // redirected instead of connecting: the stored tokens are
                // stale or revoked.
                let url_after = self.store.get_pending_auth_url(user);
                if url_after.is_some() && url_after != url_before {
                    debug!(user, service, "connect redirected to authorization");
                    return Err(Error::AuthenticationRequired {
                        service: service.to_string(),
                    });
                }
                Err(err)
            }
        }
    }

    /// Deliberately attempt a connection with no prior tokens, expecting the
    /// provider to capture an authorization redirect bound to `state`.
    /// Returns the captured URL, or `None` when the attempt unexpectedly
    /// succeeded because a race already authenticated the user (the fresh
    /// connection is cached rather than wasted).
    pub async fn initiate_auth(
        &self,
        user: &str,
        service: &str,
        state: &str,
    ) -> Result<Option<String>> {
        let key = ClientKey::new(user, service);
        let service_config = self
            .config
            .service(service)
            .ok_or_else(|| Error::UnknownService(service.to_string()))?
            .clone();

        let lock = self.connect_lock(&key);
        let _guard = lock.lock().await;

        let provider = Arc::new(CredentialProvider::new(
            self.store.clone(),
            user,
            service,
            self.config.redirect_uri(),
            Some(state.to_string()),
        ));

        let url_before = self.store.get_pending_auth_url(user);
        match ToolClient::connect(
            self.http.clone(),
            service,
            &service_config,
            &self.config.oauth.client_name,
            provider,
        )
        .await
        {
            Ok(client) => {
                self.clients.insert(key, Arc::new(client));
                METRICS.active_clients.set(self.clients.len() as f64);
                debug!(user, service, "already authenticated, connection cached");
                Ok(None)
            }
            Err(err) => {
                let url_after = self.store.get_pending_auth_url(user);
                if url_after.is_some() && url_after != url_before {
                    Ok(url_after)
                } else {
                    warn!(user, service, %err, "connection failed without an authorization redirect");
                    Err(err)
                }
            }
        }
    }

    /// Close and evict one connection; close-time errors are swallowed.
    pub async fn disconnect_client(&self, user: &str, service: &str) {
        let key = ClientKey::new(user, service);
        if let Some((_, client)) = self.clients.remove(&key) {
            client.close().await;
            METRICS.active_clients.set(self.clients.len() as f64);
            debug!(user, service, "tool client disconnected");
        }
    }

    /// Close and evict every connection a user holds.
    pub async fn disconnect_user(&self, user: &str) {
        let keys: Vec<ClientKey> = self
            .clients
            .iter()
            .filter(|entry| entry.key().user == user)
            .map(|entry| entry.key().clone())
            .collect();

        for key in keys {
            if let Some((_, client)) = self.clients.remove(&key) {
                client.close().await;
            }
        }
        METRICS.active_clients.set(self.clients.len() as f64);
        debug!(user, "disconnected all tool clients");
    }

    /// Evict without closing: the caller already knows the connection is
    /// stale, and the next `get_client` must build a fresh one with current
    /// tokens.
    pub fn invalidate_client(&self, user: &str, service: &str) {
        if self
            .clients
            .remove(&ClientKey::new(user, service))
            .is_some()
        {
            METRICS.active_clients.set(self.clients.len() as f64);
            debug!(user, service, "tool client invalidated");
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
