//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (requests, latency, connections, GOAWAYs)
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `relay_requests_total` (counter): completed requests by status
//! - `relay_request_duration_seconds` (histogram): latency distribution
//! - `relay_active_connections` (gauge): current connection count
//! - `relay_h2_goaway_total` (counter): GOAWAY frames sent by error code
//! - `relay_body_payload_too_large_total` (counter): bodies rejected for size
//!
//! # Design Decisions
//! - Low-overhead metric updates through the `metrics` facade
//! - Status labels are numeric strings ("200", "413")

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and start its HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a completed request.
pub fn record_request(status: u16, start: Instant) {
    ::metrics::counter!("relay_requests_total", "status" => status.to_string()).increment(1);
    ::metrics::histogram!("relay_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn connection_opened() {
    ::metrics::gauge!("relay_active_connections").increment(1.0);
}

pub fn connection_closed() {
    ::metrics::gauge!("relay_active_connections").decrement(1.0);
}

/// Record a GOAWAY frame sent with the given error code name.
pub fn record_goaway(reason: &'static str) {
    ::metrics::counter!("relay_h2_goaway_total", "reason" => reason).increment(1);
}

pub fn record_payload_too_large() {
    ::metrics::counter!("relay_body_payload_too_large_total").increment(1);
}
