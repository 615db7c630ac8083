//! Structured logging setup and the per-reconcile trace id (§A.2).
//!
//! Every reconcile function is `#[instrument(skip(...), fields(trace_id))]`;
//! this module supplies the `trace_id` value from the current span context
//! so log lines for one reconcile of one object can be grepped out of a
//! shared operator log.

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global `tracing` subscriber. Reads `RUST_LOG`, defaulting
/// to `info` for this crate and `warn` for dependencies. `BINDERY_LOG_FORMAT=json`
/// switches to structured JSON lines for log aggregation; anything else (the
/// default) uses the human-readable formatter.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=info,bindery_operator=info"));

    let json = std::env::var("BINDERY_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// Pulls the OpenTelemetry-style trace id out of the current span, or
/// returns an empty string when none is set (e.g. under `#[tokio::test]`).
/// Bindery doesn't wire up a real OTel exporter (§A.2 non-goal); this just
/// gives each reconcile a correlation id derived from the span's own id so
/// every log line from one reconcile call carries the same value.
pub fn get_trace_id() -> String {
    Span::current()
        .id()
        .map(|id| format!("{:x}", id.into_u64()))
        .unwrap_or_default()
}
