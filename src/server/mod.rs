pub mod callback;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::auth::{CallbackEvent, FlowCoordinator};
use crate::config::Config;
use crate::error::Result;
use crate::store::CredentialStore;

/// Callback events are human-paced; a small buffer is plenty.
const CALLBACK_CHANNEL_CAPACITY: usize = 64;

/// Cadence for reclaiming pending flows whose redirect never arrived.
const FLOW_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Wire the callback listener to the flow coordinator and serve until the
/// listener stops. Failing to bind the listener port is fatal.
pub async fn run(
    config: Arc<Config>,
    store: Arc<CredentialStore>,
    coordinator: Arc<FlowCoordinator>,
) -> Result<()> {
    let (events_tx, events_rx) = mpsc::channel::<CallbackEvent>(CALLBACK_CHANNEL_CAPACITY);

    // Single consumer of callback events
    tokio::spawn(coordinator.run(events_rx));

    // Expiry is enforced lazily at resolution; this sweep only reclaims
    // memory from abandoned flows.
    let sweep_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLOW_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let swept = sweep_store.sweep_expired_flows(Utc::now());
            if swept > 0 {
                debug!(swept, "reclaimed expired login flows");
            }
        }
    });

    callback::serve(&config.server, events_tx).await
}
