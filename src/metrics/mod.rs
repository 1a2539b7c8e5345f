//! Prometheus metrics for the notification client.
//!
//! - Frame metrics (received, malformed, stale)
//! - Dispatch metrics (delivered, unrouted, listener panics)
//! - Connection metrics (state, reconnects)

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, DispatchMetrics, FrameMetrics};

use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "notify_client";

lazy_static! {
    // ============================================================================
    // Frame Metrics
    // ============================================================================

    pub static ref FRAMES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_frames_received_total", METRIC_PREFIX),
        "Total inbound frames accepted from the current transport"
    ).unwrap();

    pub static ref FRAMES_MALFORMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_frames_malformed_total", METRIC_PREFIX),
        "Total inbound frames dropped because they could not be decoded"
    ).unwrap();

    /// Frames that arrived after their transport was replaced or torn down
    pub static ref FRAMES_STALE_TOTAL: IntCounter = register_int_counter!(
        format!("{}_frames_stale_total", METRIC_PREFIX),
        "Total inbound frames ignored because their transport is no longer current"
    ).unwrap();

    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    pub static ref EVENTS_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_delivered_total", METRIC_PREFIX),
        "Total listener invocations that completed"
    ).unwrap();

    pub static ref EVENTS_UNROUTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_unrouted_total", METRIC_PREFIX),
        "Total events discarded because no listener was registered for their type"
    ).unwrap();

    pub static ref LISTENER_PANICS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_listener_panics_total", METRIC_PREFIX),
        "Total listener invocations that panicked"
    ).unwrap();

    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// 0=disconnected, 1=connecting, 2=connected, 3=reconnect pending
    pub static ref CONNECTION_STATE: IntGauge = register_int_gauge!(
        format!("{}_connection_state", METRIC_PREFIX),
        "Connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnect pending)"
    ).unwrap();

    pub static ref TRANSPORTS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_transports_opened_total", METRIC_PREFIX),
        "Total transports that completed their handshake"
    ).unwrap();

    pub static ref RECONNECTS_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnects_scheduled_total", METRIC_PREFIX),
        "Total reconnect attempts scheduled after an abnormal close"
    ).unwrap();

    pub static ref RECONNECTS_EXHAUSTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnects_exhausted_total", METRIC_PREFIX),
        "Total times the reconnect budget ran out"
    ).unwrap();
}
