//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_commands_total` (counter): commands by action, envelope code
//! - `gateway_command_duration_seconds` (histogram): end-to-end latency
//! - `gateway_violations_total` (counter): security violations by type, severity
//! - `gateway_errors_total` (counter): logged errors by category, severity
//! - `gateway_alerts_total` (counter): alert sends by outcome
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Prometheus exporter is optional and served on its own address

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_command(action: &str, code: &str, start: Instant) {
    metrics::counter!(
        "gateway_commands_total",
        "action" => action.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "gateway_command_duration_seconds",
        "action" => action.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_violation(kind: &str, severity: &str) {
    metrics::counter!(
        "gateway_violations_total",
        "type" => kind.to_string(),
        "severity" => severity.to_string()
    )
    .increment(1);
}

pub fn record_error(category: &str, severity: &str) {
    metrics::counter!(
        "gateway_errors_total",
        "category" => category.to_string(),
        "severity" => severity.to_string()
    )
    .increment(1);
}

pub fn record_alert(outcome: &'static str) {
    metrics::counter!("gateway_alerts_total", "outcome" => outcome).increment(1);
}
