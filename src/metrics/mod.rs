//! # Metrics Collection Module

#[cfg(feature = "prometheus")]
static PROM_HANDLE: std::sync::OnceLock<metrics_exporter_prometheus::PrometheusHandle> =
    std::sync::OnceLock::new();

/// Initializes the Prometheus metrics exporter.
///
/// Installs the global recorder and spawns a background task for periodic
/// upkeep of histograms and summaries. A no-op when the `prometheus`
/// feature is not compiled in.
pub fn init() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        use tracing::debug;
        debug!("Prometheus metrics endpoint is enabled");
        if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
            let _ = PROM_HANDLE.set(handle.clone());
            use std::time::Duration;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(30));
                loop {
                    tick.tick().await;
                    handle.run_upkeep();
                }
            });
        }
    }
}

/// Render the current metrics in Prometheus exposition format.
///
/// Returns an empty string until [`init`] has run.
#[cfg(feature = "prometheus")]
pub fn render() -> String {
    PROM_HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

/// Records an MCP verb invocation.
///
/// Tracks call count and handler latency by verb name.
pub fn record_mcp_call(verb: &str, latency_ms: f64) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::{counter, histogram};
        counter!(
            "trestle_mcp_calls_total",
            "verb" => verb.to_string()
        )
        .increment(1);
        histogram!(
            "trestle_mcp_latency_ms",
            "verb" => verb.to_string()
        )
        .record(latency_ms);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        // No-op when metrics are disabled
        let _ = (verb, latency_ms);
    }
}

/// Records a plugin-channel dispatch outcome.
///
/// Tracks count and latency by method name and outcome
/// ("success", "timeout", "error", "cancel").
pub fn record_plugin_call(method: &str, outcome: &str, latency_ms: f64) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::{counter, histogram};
        counter!(
            "trestle_plugin_calls_total",
            "method" => method.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
        histogram!(
            "trestle_plugin_latency_ms",
            "method" => method.to_string()
        )
        .record(latency_ms);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        // No-op when metrics are disabled
        let _ = (method, outcome, latency_ms);
    }
}

/// Records a plugin channel connect or disconnect.
pub fn record_channel_event(event: &str) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::counter;
        counter!(
            "trestle_plugin_channel_events_total",
            "event" => event.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        // No-op when metrics are disabled
        let _ = event;
    }
}
