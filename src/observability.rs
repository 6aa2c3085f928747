//! Observability hooks: a lifecycle event trait mirroring the reference
//! crate's `EventHandler`/`AgentEvent` pattern, plus a default metrics-recording
//! implementation backed by the `prometheus` crate's default registry and exposed as
//! plain text on `GET /metrics`.

use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Structured lifecycle events the gateway emits as it processes a request.
/// Handlers observe these without being able to alter control flow.
pub enum GatewayEvent<'a> {
    RequestReceived { path: &'a str },
    ProviderCallStarted { provider: &'a str },
    ProviderCallCompleted { provider: &'a str, tokens_used: u32, duration_ms: u64 },
    ToolCallDispatched { name: &'a str },
    ToolCallCompleted { name: &'a str, is_error: bool },
    CircuitStateChanged { provider: &'a str, from: &'a str, to: &'a str },
    FallbackTriggered { from: &'a str, to: &'a str, reason: &'a str },
}

pub trait GatewayEventHandler: Send + Sync {
    fn handle(&self, _event: GatewayEvent<'_>) {}
}

/// A no-op handler, used when observability is deliberately disabled (e.g. in unit
/// tests that construct an orchestrator without a metrics registry).
pub struct NoopEventHandler;

impl GatewayEventHandler for NoopEventHandler {}

struct Metrics {
    requests_total: IntCounterVec,
    provider_calls_total: IntCounterVec,
    provider_errors_total: IntCounterVec,
    tool_calls_total: IntCounterVec,
    provider_call_duration_ms: HistogramVec,
    fallbacks_total: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| Metrics {
        requests_total: register_int_counter_vec!(
            "llmgateway_requests_total",
            "Total HTTP requests received, labeled by path.",
            &["path"]
        )
        .expect("metric registration is infallible after first call per label set"),
        provider_calls_total: register_int_counter_vec!(
            "llmgateway_provider_calls_total",
            "Total upstream provider calls, labeled by provider.",
            &["provider"]
        )
        .expect("metric registration is infallible after first call per label set"),
        provider_errors_total: register_int_counter_vec!(
            "llmgateway_provider_errors_total",
            "Total upstream provider call failures, labeled by provider.",
            &["provider"]
        )
        .expect("metric registration is infallible after first call per label set"),
        tool_calls_total: register_int_counter_vec!(
            "llmgateway_tool_calls_total",
            "Total tool invocations, labeled by tool name and outcome.",
            &["name", "outcome"]
        )
        .expect("metric registration is infallible after first call per label set"),
        provider_call_duration_ms: register_histogram_vec!(
            "llmgateway_provider_call_duration_ms",
            "Upstream provider call latency in milliseconds, labeled by provider.",
            &["provider"],
            vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
        )
        .expect("metric registration is infallible after first call per label set"),
        fallbacks_total: register_int_counter_vec!(
            "llmgateway_fallbacks_total",
            "Total fallback-chain invocations, labeled by origin provider.",
            &["from"]
        )
        .expect("metric registration is infallible after first call per label set"),
    })
}

/// The default handler wired in at process start: records every event into the
/// process-wide Prometheus registry. Logging at `debug` level is left to call sites
/// that already have `log::debug!` context (request id, model) the handler doesn't.
pub struct MetricsEventHandler;

impl GatewayEventHandler for MetricsEventHandler {
    fn handle(&self, event: GatewayEvent<'_>) {
        let m = metrics();
        match event {
            GatewayEvent::RequestReceived { path } => {
                m.requests_total.with_label_values(&[path]).inc();
            }
            GatewayEvent::ProviderCallStarted { provider } => {
                m.provider_calls_total.with_label_values(&[provider]).inc();
            }
            GatewayEvent::ProviderCallCompleted { provider, duration_ms, .. } => {
                m.provider_call_duration_ms.with_label_values(&[provider]).observe(duration_ms as f64);
            }
            GatewayEvent::ToolCallDispatched { name } => {
                log::debug!("tool call dispatched: {name}");
            }
            GatewayEvent::ToolCallCompleted { name, is_error } => {
                let outcome = if is_error { "error" } else { "ok" };
                m.tool_calls_total.with_label_values(&[name, outcome]).inc();
            }
            GatewayEvent::CircuitStateChanged { provider, from, to } => {
                log::info!("circuit breaker for {provider} transitioned {from} -> {to}");
                if to == "open" {
                    m.provider_errors_total.with_label_values(&[provider]).inc();
                }
            }
            GatewayEvent::FallbackTriggered { from, to, reason } => {
                log::warn!("falling back from {from} to {to}: {reason}");
                m.fallbacks_total.with_label_values(&[from]).inc();
            }
        }
    }
}

/// Renders the process-wide registry in Prometheus text exposition format, for the
/// `GET /metrics` handler.
pub fn render_prometheus_text() -> Result<String, prometheus::Error> {
    let _ = metrics();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_event_handler_records_without_panicking() {
        let handler = MetricsEventHandler;
        handler.handle(GatewayEvent::RequestReceived { path: "/v1/chat/completions" });
        handler.handle(GatewayEvent::ProviderCallStarted { provider: "openai" });
        handler.handle(GatewayEvent::ProviderCallCompleted { provider: "openai", tokens_used: 42, duration_ms: 120 });
        handler.handle(GatewayEvent::ToolCallDispatched { name: "echo" });
        handler.handle(GatewayEvent::ToolCallCompleted { name: "echo", is_error: false });
        handler.handle(GatewayEvent::CircuitStateChanged { provider: "openai", from: "closed", to: "open" });
        handler.handle(GatewayEvent::FallbackTriggered { from: "openai", to: "local", reason: "circuit open" });
    }

    #[test]
    fn rendered_text_contains_known_metric_names() {
        let handler = MetricsEventHandler;
        handler.handle(GatewayEvent::RequestReceived { path: "/health" });
        let text = render_prometheus_text().unwrap();
        assert!(text.contains("llmgateway_requests_total"));
    }

    #[test]
    fn noop_handler_ignores_events() {
        NoopEventHandler.handle(GatewayEvent::RequestReceived { path: "/health" });
    }
}
