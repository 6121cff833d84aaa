use prometheus::{Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

/// Global metrics for Janus
pub struct Metrics {
    pub registry: Registry,

    // Callback listener
    pub callback_requests_total: CounterVec,

    // Login flows
    pub flows_initiated_total: Counter,
    pub flows_resolved_total: CounterVec, // outcome: success, expired, unknown, exchange_failed
    pub token_exchanges_total: CounterVec,

    // Remote clients
    pub connect_attempts_total: CounterVec,
    pub active_clients: Gauge,
    pub tool_calls_total: CounterVec,
    pub tool_call_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let callback_requests_total = CounterVec::new(
            Opts::new(
                "janus_callback_requests_total",
                "OAuth callback requests received",
            ),
            &["kind"], // complete, relay
        )?;

        let flows_initiated_total = Counter::new(
            "janus_flows_initiated_total",
            "Login flows registered by the chat layer",
        )?;

        let flows_resolved_total = CounterVec::new(
            Opts::new(
                "janus_flows_resolved_total",
                "Pending login flows resolved, by outcome",
            ),
            &["outcome"],
        )?;

        let token_exchanges_total = CounterVec::new(
            Opts::new(
                "janus_token_exchanges_total",
                "Authorization-code token exchanges, by service and status",
            ),
            &["service", "status"],
        )?;

        let connect_attempts_total = CounterVec::new(
            Opts::new(
                "janus_connect_attempts_total",
                "Remote tool connection attempts, by service and status",
            ),
            &["service", "status"],
        )?;

        let active_clients = Gauge::new(
            "janus_active_clients",
            "Cached authenticated tool connections",
        )?;

        let tool_calls_total = CounterVec::new(
            Opts::new(
                "janus_tool_calls_total",
                "Remote tool invocations, by service and status",
            ),
            &["service", "status"],
        )?;

        let tool_call_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "janus_tool_call_duration_seconds",
                "Remote tool invocation duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
            &["service"],
        )?;

        registry.register(Box::new(callback_requests_total.clone()))?;
        registry.register(Box::new(flows_initiated_total.clone()))?;
        registry.register(Box::new(flows_resolved_total.clone()))?;
        registry.register(Box::new(token_exchanges_total.clone()))?;
        registry.register(Box::new(connect_attempts_total.clone()))?;
        registry.register(Box::new(active_clients.clone()))?;
        registry.register(Box::new(tool_calls_total.clone()))?;
        registry.register(Box::new(tool_call_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            callback_requests_total,
            flows_initiated_total,
            flows_resolved_total,
            token_exchanges_total,
            connect_attempts_total,
            active_clients,
            tool_calls_total,
            tool_call_duration_seconds,
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<Arc<Metrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(Metrics::default()));
