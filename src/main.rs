use anyhow::Result;
use async_trait::async_trait;
use janus::auth::{AuthEventHandler, FlowCoordinator};
use janus::clients::ClientManager;
use janus::config::Config;
use janus::store::CredentialStore;
use janus::types::ChatContext;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Stands in for the chat layer when janus runs standalone: login
/// completions are logged instead of delivered to a chat surface.
struct LoggingHandler;

#[async_trait]
impl AuthEventHandler for LoggingHandler {
    async fn on_auth_complete(
        &self,
        user: &str,
        _context: &ChatContext,
        service: &str,
        result: janus::Result<()>,
    ) {
        match result {
            Ok(()) => info!(user, service, "login completed"),
            Err(err) => warn!(user, service, %err, "login failed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Janus auth broker v{}", janus::VERSION);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!("✓ Configuration loaded");
    info!("  HTTP: {}", config.server.bind);
    info!(
        "  Services: {}",
        config
            .enabled_services()
            .iter()
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let store = Arc::new(CredentialStore::new());
    let clients = Arc::new(ClientManager::new(config.clone(), store.clone()));
    let coordinator = Arc::new(FlowCoordinator::new(
        config.clone(),
        store.clone(),
        clients,
        Arc::new(LoggingHandler),
    ));

    // Bind failure here is fatal; there is no retry.
    janus::server::run(config, store, coordinator).await?;

    Ok(())
}
