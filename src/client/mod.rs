//! Application-facing notification client.
//!
//! Wires a [`ConnectionManager`] to the WebSocket transport and the tokio
//! scheduler. Construct one per authenticated session and pass clones to any
//! collaborator that needs to subscribe.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::config::ClientConfig;
use crate::connection_manager::{ConnectionManager, ConnectionState, ConnectionStats};
use crate::error::Result;
use crate::reconnect::{Scheduler, TokioScheduler};
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::transport::{Transport, WsTransport};
use crate::websocket::{ClientMessage, Event};

#[derive(Clone)]
pub struct NotificationClient {
    manager: ConnectionManager,
}

impl NotificationClient {
    /// Client over WebSocket, bound to the current tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(WsTransport::new(&config)?);
        let scheduler = Arc::new(TokioScheduler::new()?);
        Self::with_parts(config, transport, scheduler)
    }

    /// Client over caller-supplied transport and scheduler.
    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        let manager =
            ConnectionManager::new(config, transport, scheduler, SubscriptionRegistry::new())?;
        Ok(Self { manager })
    }

    pub fn connect(&self, credential: impl Into<String>) {
        self.manager.connect(credential);
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    pub fn subscribe<F>(&self, event_type: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.manager.subscribe(event_type, listener)
    }

    /// Subscribe with the payload decoded into `T`.
    ///
    /// Events whose payload does not fit `T` are logged and skipped for this
    /// listener only.
    pub fn subscribe_typed<T, F>(&self, event_type: impl Into<String>, listener: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.manager.subscribe(event_type, move |event: &Event| {
            match event.payload_as::<T>() {
                Ok(payload) => listener(payload),
                Err(e) => tracing::warn!(
                    event_type = %event.event_type,
                    error = %e,
                    "Event payload did not match the expected shape"
                ),
            }
        })
    }

    pub fn send(&self, message: &ClientMessage) -> Result<()> {
        self.manager.send(message)
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.manager.stats()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::ManualScheduler;
    use crate::transport::MemoryTransport;
    use parking_lot::Mutex;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct ClaimStatus {
        id: String,
        status: String,
    }

    #[test]
    fn test_subscribe_typed_decodes_payload() {
        let transport = MemoryTransport::new();
        let client = NotificationClient::with_parts(
            ClientConfig::default(),
            Arc::new(transport.clone()),
            Arc::new(ManualScheduler::new()),
        )
        .unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        client.subscribe_typed("claim_status", move |claim: ClaimStatus| r.lock().push(claim));

        client.connect("token-1");
        let conn = transport.last().unwrap();
        conn.accept();
        conn.deliver(r#"{"type":"claim_status","id":"RD-1","status":"approved"}"#);
        conn.deliver(r#"{"type":"claim_status","id":42}"#);

        assert_eq!(
            *received.lock(),
            vec![ClaimStatus {
                id: "RD-1".to_string(),
                status: "approved".to_string()
            }]
        );
    }

    #[test]
    fn test_new_requires_runtime() {
        assert!(NotificationClient::new(ClientConfig::default()).is_err());
    }
}
