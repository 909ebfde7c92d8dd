//! # Metrics
//!
//! Prometheus export plus the handful of gateway metrics:
//!
//! - `gateway_decisions_total{outcome}`: enforcement outcomes (`allow`, `allow_whitelist`,
//!   `deny_no_token`, `deny_no_match`, `deny_rule`, `deny_no_service`, `enrichment_error`, ...)
//! - `gateway_enforce_duration_seconds`: time spent in enforcement
//! - `gateway_upstream_errors_total{kind}`: proxy failures (`unavailable`, `timeout`)
//! - `gateway_websocket_tunnels_total{outcome}`: tunnel lifecycle (`opened`, `denied`,
//!   `backend_unreachable`, `closed`)
//!
//! Recording is a no-op until [`install_exporter`] has run, which keeps tests quiet.

use crate::core::config::MetricsConfig;
use crate::core::error::{GatewayError, GatewayResult};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::time::Duration;
use tracing::info;

const ENFORCE_DURATION: &str = "gateway_enforce_duration_seconds";
const ENFORCE_BUCKETS: &[f64] = &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Start the Prometheus exporter on its own listener
pub fn install_exporter(config: &MetricsConfig) -> GatewayResult<()> {
    if !config.enabled {
        info!("Metrics export disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen_address)
        .set_buckets_for_metric(Matcher::Full(ENFORCE_DURATION.to_string()), ENFORCE_BUCKETS)
        .map_err(|e| GatewayError::config(format!("Failed to set histogram buckets: {}", e)))?
        .install()
        .map_err(|e| GatewayError::config(format!("Failed to install metrics exporter: {}", e)))?;

    info!(address = %config.listen_address, "Prometheus exporter listening");
    Ok(())
}

pub fn record_decision(outcome: &'static str, elapsed: Duration) {
    counter!("gateway_decisions_total", "outcome" => outcome).increment(1);
    histogram!(ENFORCE_DURATION).record(elapsed.as_secs_f64());
}

pub fn record_upstream_error(kind: &'static str) {
    counter!("gateway_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_tunnel(outcome: &'static str) {
    counter!("gateway_websocket_tunnels_total", "outcome" => outcome).increment(1);
}
