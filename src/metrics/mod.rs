//! Prometheus metrics for the session gateway.
//!
//! Gauges are refreshed by the liveness task each probe round; counters are
//! incremented at the call sites in the session state machine.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "orbit";

lazy_static! {
    /// Total registered sessions
    pub static ref SESSIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_sessions_total", METRIC_PREFIX),
        "Total number of registered sessions"
    ).unwrap();

    /// Sessions with an open connection
    pub static ref SESSIONS_OPEN: IntGauge = register_int_gauge!(
        format!("{}_sessions_open", METRIC_PREFIX),
        "Number of sessions with an open connection"
    ).unwrap();

    /// Connection closes by classified reason
    pub static ref RECONNECTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connection_closes_total", METRIC_PREFIX),
        "Connection closes by classified reason",
        &["reason"]
    ).unwrap();

    /// QR challenges cached
    pub static ref QR_ISSUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_qr_issued_total", METRIC_PREFIX),
        "QR challenges cached for end-user scanning"
    ).unwrap();

    /// Pairing codes issued
    pub static ref PAIRING_CODES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_pairing_codes_total", METRIC_PREFIX),
        "Pairing codes issued"
    ).unwrap();

    /// Failed liveness probes
    pub static ref PROBE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_probe_failures_total", METRIC_PREFIX),
        "Failed liveness probes"
    ).unwrap();

    /// Messages accepted by the transport
    pub static ref MESSAGES_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Messages accepted by the transport"
    ).unwrap();

    /// Message send failures
    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Message send failures"
    ).unwrap();
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_includes_prefix() {
        SESSIONS_TOTAL.set(3);
        let text = encode_metrics().unwrap();
        assert!(text.contains("orbit_sessions_total"));
    }
}
