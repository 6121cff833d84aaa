//! OAuth callback listener.
//!
//! A deliberately dumb endpoint: it extracts `(code, state)` and publishes
//! them on the event channel. It never looks at the pending-flow registry or
//! any user identity — correlation is the flow coordinator's job, on the
//! other end of the channel.

use axum::{
    Router,
    extract::{Query, State},
    response::Html,
    routing::get,
};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::CallbackEvent;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::metrics::METRICS;

const CONFIRMATION_HTML: &str = "<html><body><h1>Authentication complete</h1><p>You can close this window and return to the chat.</p></body></html>";

/// Served when `code`/`state` are missing from the query string. Browsers
/// never forward URL fragments to the server, so this page moves fragment
/// parameters into the query string and re-requests the callback.
const FRAGMENT_RELAY_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head><title>Completing sign-in</title></head>
  <body>
    <p>Completing sign-in&hellip;</p>
    <script>
      var fragment = window.location.hash;
      if (fragment && fragment.length > 1) {
        var sep = window.location.search ? "&" : "?";
        window.location.replace(window.location.pathname + window.location.search + sep + fragment.substring(1));
      } else {
        document.body.textContent = "Missing authorization parameters. Please retry the login from chat.";
      }
    </script>
  </body>
</html>
"#;

#[derive(Clone)]
pub struct CallbackState {
    events: mpsc::Sender<CallbackEvent>,
}

pub fn build_router(events: mpsc::Sender<CallbackEvent>) -> Router {
    Router::new()
        .route("/callback", get(callback_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(CallbackState { events })
}

/// Bind and serve until the process exits. A bind failure propagates to the
/// caller; startup has nothing to retry with.
pub async fn serve(config: &ServerConfig, events: mpsc::Sender<CallbackEvent>) -> Result<()> {
    let app = build_router(events);
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("✓ callback listener on {}", config.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

/// GET /callback
async fn callback_handler(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<&'static str> {
    match (params.get("code"), params.get("state")) {
        (Some(code), Some(flow_state)) => {
            METRICS
                .callback_requests_total
                .with_label_values(&["complete"])
                .inc();
            let event = CallbackEvent {
                code: code.clone(),
                state: flow_state.clone(),
            };
            if state.events.send(event).await.is_err() {
                error!("callback event channel closed, dropping redirect");
            }
            Html(CONFIRMATION_HTML)
        }
        _ => {
            METRICS
                .callback_requests_total
                .with_label_values(&["relay"])
                .inc();
            Html(FRAGMENT_RELAY_HTML)
        }
    }
}

/// GET /health
async fn health_handler() -> &'static str {
    "OK"
}

/// GET /metrics (Prometheus format)
async fn metrics_handler() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = METRICS.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
