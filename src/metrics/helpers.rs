//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTION_STATE, EVENTS_DELIVERED_TOTAL, EVENTS_UNROUTED_TOTAL, FRAMES_MALFORMED_TOTAL,
    FRAMES_RECEIVED_TOTAL, FRAMES_STALE_TOTAL, LISTENER_PANICS_TOTAL, RECONNECTS_EXHAUSTED_TOTAL,
    RECONNECTS_SCHEDULED_TOTAL, TRANSPORTS_OPENED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording inbound frame metrics
pub struct FrameMetrics;

impl FrameMetrics {
    pub fn record_received() {
        FRAMES_RECEIVED_TOTAL.inc();
    }

    pub fn record_malformed() {
        FRAMES_MALFORMED_TOTAL.inc();
    }

    pub fn record_stale() {
        FRAMES_STALE_TOTAL.inc();
    }
}

/// Helper struct for recording fan-out metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    pub fn record_delivered(count: u64) {
        EVENTS_DELIVERED_TOTAL.inc_by(count);
    }

    pub fn record_unrouted() {
        EVENTS_UNROUTED_TOTAL.inc();
    }

    pub fn record_listener_panic() {
        LISTENER_PANICS_TOTAL.inc();
    }
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn set_state(code: i64) {
        CONNECTION_STATE.set(code);
    }

    pub fn record_opened() {
        TRANSPORTS_OPENED_TOTAL.inc();
    }

    pub fn record_reconnect_scheduled() {
        RECONNECTS_SCHEDULED_TOTAL.inc();
    }

    pub fn record_reconnect_exhausted() {
        RECONNECTS_EXHAUSTED_TOTAL.inc();
    }
}
