//! Connection state machine types

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Observable state of the connection manager.
///
/// `Disconnected → Connecting → Connected → (ReconnectPending → Connecting)* → Disconnected`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Initial state; also reached by `disconnect()` or an exhausted retry budget
    #[default]
    Disconnected,
    /// Transport opened, handshake not yet complete
    Connecting,
    Connected,
    /// Transport lost; reconnect number `attempt` fires after `delay`
    ReconnectPending { attempt: u32, delay: Duration },
}

impl ConnectionState {
    /// Gauge value exported to metrics
    pub fn as_gauge(&self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::ReconnectPending { .. } => 3,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_reconnect_pending(&self) -> bool {
        matches!(self, ConnectionState::ReconnectPending { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::ReconnectPending { attempt, delay } => write!(
                f,
                "reconnect_pending(attempt={}, delay={}ms)",
                attempt,
                delay.as_millis()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::ReconnectPending {
                attempt: 2,
                delay: Duration::from_millis(2000)
            }
            .to_string(),
            "reconnect_pending(attempt=2, delay=2000ms)"
        );
    }

    #[test]
    fn test_serialize_tagged() {
        let value = serde_json::to_value(ConnectionState::Connecting).unwrap();
        assert_eq!(value, serde_json::json!({"state": "connecting"}));

        let value = serde_json::to_value(ConnectionState::ReconnectPending {
            attempt: 1,
            delay: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(value["state"], "reconnect_pending");
        assert_eq!(value["attempt"], 1);
    }
}
