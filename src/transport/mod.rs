//! Transport abstraction for the event stream
//!
//! A [`Transport`] opens one message-framed, full-duplex connection per call
//! and reports its lifecycle back through [`TransportEvents`]. Every report
//! carries the session id it was opened with, so the listener can ignore
//! anything coming from a transport it has already replaced.
//!
//! - `WsTransport`: WebSocket client over `tokio-tungstenite`
//! - `MemoryTransport`: in-process transport driven by hand, for tests

mod memory;
mod ws;

pub use memory::{MemoryConnection, MemoryTransport};
pub use ws::WsTransport;

use std::fmt;
use std::sync::Weak;

use serde::Serialize;
use url::Url;
use uuid::Uuid;

use crate::error::Result;

/// Opens transports. `open` must not block; it starts the connection and
/// returns a handle immediately.
pub trait Transport: Send + Sync {
    fn open(&self, url: &Url, events: TransportEvents) -> Box<dyn TransportHandle>;
}

/// Owner-side handle to one open (or opening) transport.
pub trait TransportHandle: Send + Sync {
    /// Queue a text frame for sending.
    fn send(&self, text: String) -> Result<()>;

    /// Close the transport. A transport closed this way does not report
    /// `closed` back through its [`TransportEvents`].
    fn close(&self);
}

/// Receiver of transport lifecycle reports
pub trait TransportListener: Send + Sync {
    fn on_open(&self, session_id: Uuid);
    fn on_frame(&self, session_id: Uuid, frame: &str);
    fn on_close(&self, session_id: Uuid, reason: CloseReason);
}

/// Why a transport stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseReason {
    /// WebSocket close code, if one was received (1000 = normal, 1006 = abnormal)
    pub code: Option<u16>,
    pub message: String,
}

impl CloseReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code: {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Report sink handed to a transport when it is opened.
///
/// Holds the listener weakly: once the owner is gone, reports are dropped.
#[derive(Clone)]
pub struct TransportEvents {
    listener: Weak<dyn TransportListener>,
    session_id: Uuid,
}

impl TransportEvents {
    pub fn new(listener: Weak<dyn TransportListener>, session_id: Uuid) -> Self {
        Self {
            listener,
            session_id,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The handshake completed.
    pub fn opened(&self) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_open(self.session_id);
        }
    }

    /// A text frame arrived.
    pub fn frame(&self, frame: &str) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_frame(self.session_id, frame);
        }
    }

    /// The peer closed the connection or the stream ended.
    pub fn closed(&self, reason: CloseReason) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_close(self.session_id, reason);
        }
    }

    /// The connection failed; reported to the listener as a close.
    pub fn failed(&self, error: impl fmt::Display) {
        tracing::warn!(session_id = %self.session_id, error = %error, "Transport failed");
        self.closed(CloseReason::new(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        reports: Mutex<Vec<String>>,
    }

    impl TransportListener for Recorder {
        fn on_open(&self, session_id: Uuid) {
            self.reports.lock().push(format!("open {}", session_id));
        }

        fn on_frame(&self, _session_id: Uuid, frame: &str) {
            self.reports.lock().push(format!("frame {}", frame));
        }

        fn on_close(&self, _session_id: Uuid, reason: CloseReason) {
            self.reports.lock().push(format!("close {}", reason));
        }
    }

    #[test]
    fn test_events_forward_with_session() {
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn TransportListener> = recorder.clone();
        let session = Uuid::new_v4();
        let events = TransportEvents::new(Arc::downgrade(&listener), session);

        events.opened();
        events.frame("hello");
        events.failed("connection reset");

        assert_eq!(
            *recorder.reports.lock(),
            vec![
                format!("open {}", session),
                "frame hello".to_string(),
                "close connection reset".to_string(),
            ]
        );
    }

    #[test]
    fn test_events_dropped_after_listener_gone() {
        let listener: Arc<dyn TransportListener> = Arc::new(Recorder::default());
        let events = TransportEvents::new(Arc::downgrade(&listener), Uuid::new_v4());
        drop(listener);

        // No listener left; must be a no-op
        events.opened();
        events.frame("ignored");
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::new("gone").to_string(), "gone");
        assert_eq!(
            CloseReason::with_code("going away", 1001).to_string(),
            "going away (code: 1001)"
        );
    }
}
