//! In-process transport for tests and local tooling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::error::{ClientError, Result};

use super::{CloseReason, Transport, TransportEvents, TransportHandle};

/// Records every open and lets the caller play the server side by hand.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    connections: Arc<Mutex<Vec<MemoryConnection>>>,
}

/// Server-side view of one opened transport
#[derive(Clone)]
pub struct MemoryConnection {
    url: Url,
    events: TransportEvents,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

struct MemoryHandle {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transports ever opened
    pub fn open_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Transports opened and not yet closed from either side
    pub fn live_count(&self) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }

    pub fn connection(&self, index: usize) -> Option<MemoryConnection> {
        self.connections.lock().get(index).cloned()
    }

    /// Most recently opened transport
    pub fn last(&self) -> Option<MemoryConnection> {
        self.connections.lock().last().cloned()
    }

    pub fn connections(&self) -> Vec<MemoryConnection> {
        self.connections.lock().clone()
    }
}

impl Transport for MemoryTransport {
    fn open(&self, url: &Url, events: TransportEvents) -> Box<dyn TransportHandle> {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));

        self.connections.lock().push(MemoryConnection {
            url: url.clone(),
            events,
            sent: sent.clone(),
            closed: closed.clone(),
        });

        Box::new(MemoryHandle { sent, closed })
    }
}

impl TransportHandle for MemoryHandle {
    fn send(&self, text: String) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::NotConnected);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl MemoryConnection {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Value of the `token` query parameter the transport was opened with
    pub fn token(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frames the client has sent on this transport
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Complete the handshake.
    pub fn accept(&self) {
        self.events.opened();
    }

    /// Deliver a text frame to the client.
    pub fn deliver(&self, frame: &str) {
        self.events.frame(frame);
    }

    /// Close from the server side (abrupt from the client's point of view).
    pub fn drop_connection(&self, reason: CloseReason) {
        self.closed.store(true, Ordering::Release);
        self.events.closed(reason);
    }

    /// Fail the transport with an error.
    pub fn fail(&self, error: &str) {
        self.closed.store(true, Ordering::Release);
        self.events.failed(error);
    }
}
