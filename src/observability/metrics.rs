//! Metrics collection and exposition.
//!
//! # Metrics
//! - `control_plane_clients` (gauge): registered clients
//! - `control_plane_saves_total` (counter): registry saves by `outcome`
//! - `control_plane_probe_total` (counter): probes by `outcome`
//! - `control_plane_target_state` (gauge): liveness per `target`
//!   (0=offline, 1=active, 2=reconnecting)
//! - `control_plane_round_duration_seconds` (histogram): health round latency
//! - `control_plane_round_abandoned_total` (counter): probes abandoned at
//!   the round budget

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_client_count(count: usize) {
    gauge!("control_plane_clients").set(count as f64);
}

pub fn record_save(outcome: &'static str) {
    counter!("control_plane_saves_total", "outcome" => outcome).increment(1);
}

pub fn record_probe(outcome: &'static str) {
    counter!("control_plane_probe_total", "outcome" => outcome).increment(1);
}

pub fn record_target_state(target: &str, state: u8) {
    gauge!("control_plane_target_state", "target" => target.to_string()).set(f64::from(state));
}

pub fn record_round(duration: Duration, abandoned: usize) {
    histogram!("control_plane_round_duration_seconds").record(duration.as_secs_f64());
    if abandoned > 0 {
        counter!("control_plane_round_abandoned_total").increment(abandoned as u64);
    }
}
