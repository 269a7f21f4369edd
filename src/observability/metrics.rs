//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define relay metrics (handshakes, intake outcomes, transport retries)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `relay_intake_total` (counter): intake outcomes by `outcome`
//! - `relay_key_exchange_total` (counter): exchanges by `result`
//! - `relay_rate_limited_total` (counter): transactions over the per-minute cap
//! - `relay_devices_blocked_total` (counter): devices blocked
//! - `relay_active_sessions` (gauge): capacity permits in use
//! - `relay_frame_retries_total` (counter): frame write retries
//! - `relay_gas_estimate_fallback_total` (counter): 21000 fallbacks
//! - `relay_underpriced_total` (counter): transactions below network gas price
//! - `relay_audit_dropped_total` (counter): audit records lost to a full queue
//! - `relay_rpc_health` (gauge): 1=reachable, 0=failing, by `chain`
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which keeps tests free of globals

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_intake(outcome: &'static str) {
    ::metrics::counter!("relay_intake_total", "outcome" => outcome).increment(1);
}

pub fn record_key_exchange(result: &'static str) {
    ::metrics::counter!("relay_key_exchange_total", "result" => result).increment(1);
}

pub fn record_rate_limited() {
    ::metrics::counter!("relay_rate_limited_total").increment(1);
}

pub fn record_device_blocked() {
    ::metrics::counter!("relay_devices_blocked_total").increment(1);
}

pub fn set_active_sessions(count: usize) {
    ::metrics::gauge!("relay_active_sessions").set(count as f64);
}

pub fn record_frame_retry() {
    ::metrics::counter!("relay_frame_retries_total").increment(1);
}

pub fn record_gas_estimate_fallback() {
    ::metrics::counter!("relay_gas_estimate_fallback_total").increment(1);
}

pub fn record_underpriced() {
    ::metrics::counter!("relay_underpriced_total").increment(1);
}

pub fn record_audit_dropped() {
    ::metrics::counter!("relay_audit_dropped_total").increment(1);
}

pub fn record_rpc_health(chain_id: u64, healthy: bool) {
    ::metrics::gauge!("relay_rpc_health", "chain" => chain_id.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
