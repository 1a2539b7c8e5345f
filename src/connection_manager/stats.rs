//! Connection statistics

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::ConnectionState;

/// Point-in-time snapshot of the connection manager
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    /// Session id of the current transport, if any
    pub session_id: Option<Uuid>,
    /// Reconnects scheduled since the last successful open or explicit connect
    pub reconnect_attempts: u32,
    pub connected_at: Option<DateTime<Utc>>,
    /// Last inbound frame on the current transport (includes pong replies)
    pub last_frame_at: Option<DateTime<Utc>>,
    pub event_types: usize,
    pub listeners: usize,
}
