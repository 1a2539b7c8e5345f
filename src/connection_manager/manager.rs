use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use url::Url;
use uuid::Uuid;

use crate::config::{with_credential, ClientConfig};
use crate::error::{ClientError, Result};
use crate::metrics::{ConnectionMetrics, FrameMetrics};
use crate::reconnect::{ExponentialBackoff, Scheduler, TimerHandle};
use crate::subscription::{DispatchOutcome, Subscription, SubscriptionRegistry};
use crate::transport::{CloseReason, Transport, TransportEvents, TransportHandle, TransportListener};
use crate::websocket::{ClientMessage, Event};

use super::{ConnectionState, ConnectionStats};

/// Owns the lifecycle of one logical event-stream connection.
///
/// Opens the transport for a credential, decodes inbound frames and hands
/// them to the [`SubscriptionRegistry`], and reconnects with bounded
/// exponential backoff when the transport drops. Cloning yields another
/// handle to the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    weak_self: Weak<Inner>,
    base_url: Url,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    registry: SubscriptionRegistry,
    state: Mutex<ManagerState>,
    state_tx: watch::Sender<ConnectionState>,
}

struct ManagerState {
    phase: ConnectionState,
    transport: Option<Arc<dyn TransportHandle>>,
    /// Session of the transport currently owned; `None` when there is none
    session_id: Option<Uuid>,
    /// Retained across automatic reconnects, forgotten on `disconnect()`
    credential: Option<String>,
    backoff: ExponentialBackoff,
    /// Bumped by `connect`/`disconnect`; scheduled tasks from older epochs are no-ops
    epoch: u64,
    reconnect_timer: Option<TimerHandle>,
    keepalive_timer: Option<TimerHandle>,
    connected_at: Option<DateTime<Utc>>,
    last_frame_at: Option<DateTime<Utc>>,
}

impl ManagerState {
    fn is_current(&self, session_id: Uuid) -> bool {
        self.session_id == Some(session_id)
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = self.keepalive_timer.take() {
            timer.cancel();
        }
    }
}

impl ConnectionManager {
    /// Build a manager. Validates `config`; nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        registry: SubscriptionRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let base_url = config.endpoint_url()?;
        let backoff = ExponentialBackoff::with_config(config.reconnect.backoff());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let inner = Arc::new_cyclic(|weak_self| Inner {
            weak_self: weak_self.clone(),
            base_url,
            config,
            transport,
            scheduler,
            registry,
            state: Mutex::new(ManagerState {
                phase: ConnectionState::Disconnected,
                transport: None,
                session_id: None,
                credential: None,
                backoff,
                epoch: 0,
                reconnect_timer: None,
                keepalive_timer: None,
                connected_at: None,
                last_frame_at: None,
            }),
            state_tx,
        });

        Ok(Self { inner })
    }

    /// Open the event stream with `credential`.
    ///
    /// Any live transport is closed first and any pending reconnect is
    /// cancelled, so at most one transport exists afterwards. Returns
    /// immediately; progress is visible through [`state`](Self::state).
    pub fn connect(&self, credential: impl Into<String>) {
        let credential = credential.into();

        let (previous, epoch) = {
            let mut st = self.inner.state.lock();
            st.epoch += 1;
            st.cancel_timers();
            st.backoff.reset();
            st.credential = Some(credential);
            st.session_id = None;
            st.connected_at = None;
            (st.transport.take(), st.epoch)
        };

        if let Some(previous) = previous {
            tracing::info!("Replacing existing transport");
            previous.close();
        }

        self.inner.open_transport(epoch);
    }

    /// Close the transport, cancel pending timers, reset the attempt counter,
    /// forget the credential and drop every subscription. Idempotent.
    pub fn disconnect(&self) {
        let (previous, was_active) = {
            let mut st = self.inner.state.lock();
            st.epoch += 1;
            st.cancel_timers();
            st.backoff.reset();
            st.credential = None;
            st.session_id = None;
            st.connected_at = None;
            st.last_frame_at = None;
            let was_active = st.phase != ConnectionState::Disconnected;
            self.inner.transition(&mut st, ConnectionState::Disconnected);
            (st.transport.take(), was_active)
        };

        if let Some(previous) = previous {
            previous.close();
        }
        self.inner.registry.clear();

        if was_active {
            tracing::info!("Disconnected");
        }
    }

    /// Register `listener` for events of `event_type`.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(event_type, listener)
    }

    /// Send a message to the server over the live transport.
    pub fn send(&self, message: &ClientMessage) -> Result<()> {
        let transport = {
            let st = self.inner.state.lock();
            match (&st.phase, &st.transport) {
                (ConnectionState::Connected, Some(transport)) => transport.clone(),
                _ => return Err(ClientError::NotConnected),
            }
        };
        transport.send(message.to_frame()?)
    }

    /// Feed a raw frame as if it came from the current transport.
    ///
    /// Returns `None` when the frame is dropped: either it is malformed, or no
    /// transport is owned (so nothing dispatches after
    /// [`disconnect`](Self::disconnect)).
    pub fn handle_message(&self, frame: &str) -> Option<DispatchOutcome> {
        {
            let mut st = self.inner.state.lock();
            if st.session_id.is_none() {
                FrameMetrics::record_stale();
                tracing::trace!("Dropping frame received without a live transport");
                return None;
            }
            st.last_frame_at = Some(Utc::now());
        }
        self.inner.process_frame(frame)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().phase
    }

    /// Receiver for state transitions, for presentation-layer observers.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> ConnectionStats {
        let st = self.inner.state.lock();
        ConnectionStats {
            state: st.phase,
            session_id: st.session_id,
            reconnect_attempts: st.backoff.attempt(),
            connected_at: st.connected_at,
            last_frame_at: st.last_frame_at,
            event_types: self.inner.registry.len(),
            listeners: self.inner.registry.total_listeners(),
        }
    }
}

impl Inner {
    fn transition(&self, st: &mut ManagerState, next: ConnectionState) {
        if st.phase == next {
            return;
        }
        tracing::debug!(from = %st.phase, to = %next, "Connection state transition");
        st.phase = next;
        ConnectionMetrics::set_state(next.as_gauge());
        self.state_tx.send_replace(next);
    }

    /// Open a transport for the retained credential, unless `epoch` is stale.
    fn open_transport(&self, epoch: u64) {
        let (url, session_id) = {
            let mut st = self.state.lock();
            if st.epoch != epoch {
                return;
            }
            let Some(credential) = st.credential.as_deref() else {
                return;
            };
            let url = with_credential(&self.base_url, credential);
            let session_id = Uuid::new_v4();
            st.session_id = Some(session_id);
            st.last_frame_at = None;
            self.transition(&mut st, ConnectionState::Connecting);
            (url, session_id)
        };

        tracing::info!(
            session_id = %session_id,
            endpoint = %self.base_url,
            "Opening event stream"
        );

        let listener: Weak<dyn TransportListener> = self.weak_self.clone();
        let handle: Arc<dyn TransportHandle> =
            Arc::from(self.transport.open(&url, TransportEvents::new(listener, session_id)));

        let mut st = self.state.lock();
        if st.session_id == Some(session_id) {
            st.transport = Some(handle);
        } else {
            // Superseded or closed while opening
            drop(st);
            handle.close();
        }
    }

    fn process_frame(&self, frame: &str) -> Option<DispatchOutcome> {
        FrameMetrics::record_received();

        match Event::decode(frame) {
            Ok(event) => {
                tracing::trace!(event_type = %event.event_type, "Dispatching event");
                Some(self.registry.dispatch(&event))
            }
            Err(e) => {
                FrameMetrics::record_malformed();
                tracing::warn!(error = %e, len = frame.len(), "Dropping malformed frame");
                None
            }
        }
    }

    fn reconnect(&self, epoch: u64) {
        {
            let mut st = self.state.lock();
            if st.epoch != epoch || !st.phase.is_reconnect_pending() {
                return;
            }
            st.reconnect_timer = None;
        }

        tracing::info!("Reconnecting");
        self.open_transport(epoch);
    }

    fn arm_keepalive(&self, epoch: u64, session_id: Uuid) {
        let Some(interval) = self.config.heartbeat_interval() else {
            return;
        };

        let weak = self.weak_self.clone();
        let timer = self.scheduler.schedule(
            interval,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.keepalive(epoch, session_id);
                }
            }),
        );

        let mut st = self.state.lock();
        if st.epoch == epoch && st.is_current(session_id) {
            if let Some(old) = st.keepalive_timer.replace(timer) {
                old.cancel();
            }
        } else {
            drop(st);
            timer.cancel();
        }
    }

    fn keepalive(&self, epoch: u64, session_id: Uuid) {
        let transport = {
            let mut st = self.state.lock();
            if st.epoch != epoch || !st.is_current(session_id) || !st.phase.is_connected() {
                return;
            }
            st.keepalive_timer = None;
            st.transport.clone()
        };

        if let Some(transport) = transport {
            let sent = ClientMessage::Ping
                .to_frame()
                .map_err(ClientError::from)
                .and_then(|frame| transport.send(frame));
            match sent {
                Ok(()) => tracing::trace!(session_id = %session_id, "Keepalive ping sent"),
                Err(e) => tracing::warn!(session_id = %session_id, error = %e, "Keepalive ping failed"),
            }
        }

        self.arm_keepalive(epoch, session_id);
    }
}

impl TransportListener for Inner {
    fn on_open(&self, session_id: Uuid) {
        let epoch = {
            let mut st = self.state.lock();
            if !st.is_current(session_id) || st.phase != ConnectionState::Connecting {
                tracing::debug!(session_id = %session_id, "Ignoring open from stale transport");
                return;
            }
            st.backoff.reset();
            st.connected_at = Some(Utc::now());
            self.transition(&mut st, ConnectionState::Connected);
            st.epoch
        };

        ConnectionMetrics::record_opened();
        tracing::info!(session_id = %session_id, "Event stream connected");
        self.arm_keepalive(epoch, session_id);
    }

    fn on_frame(&self, session_id: Uuid, frame: &str) {
        {
            let mut st = self.state.lock();
            if !st.is_current(session_id) {
                FrameMetrics::record_stale();
                tracing::trace!(session_id = %session_id, "Ignoring frame from stale transport");
                return;
            }
            st.last_frame_at = Some(Utc::now());
        }

        self.process_frame(frame);
    }

    fn on_close(&self, session_id: Uuid, reason: CloseReason) {
        let plan = {
            let mut st = self.state.lock();
            if !st.is_current(session_id) {
                tracing::debug!(session_id = %session_id, "Ignoring close from stale transport");
                return;
            }
            st.session_id = None;
            st.transport = None;
            st.connected_at = None;
            if let Some(timer) = st.keepalive_timer.take() {
                timer.cancel();
            }

            match st.backoff.next_delay() {
                Some(delay) => {
                    let attempt = st.backoff.attempt();
                    self.transition(&mut st, ConnectionState::ReconnectPending { attempt, delay });
                    Some((st.epoch, attempt, delay))
                }
                None => {
                    self.transition(&mut st, ConnectionState::Disconnected);
                    None
                }
            }
        };

        let Some((epoch, attempt, delay)) = plan else {
            ConnectionMetrics::record_reconnect_exhausted();
            tracing::error!(
                session_id = %session_id,
                reason = %reason,
                max_attempts = self.config.reconnect.max_attempts,
                "Event stream lost and reconnect attempts exhausted"
            );
            return;
        };

        ConnectionMetrics::record_reconnect_scheduled();
        tracing::warn!(
            session_id = %session_id,
            reason = %reason,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Event stream lost, scheduling reconnect"
        );

        let weak = self.weak_self.clone();
        let timer = self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.reconnect(epoch);
                }
            }),
        );

        let mut st = self.state.lock();
        if st.epoch == epoch && st.phase.is_reconnect_pending() {
            st.reconnect_timer = Some(timer);
        } else {
            drop(st);
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::ManualScheduler;
    use crate::transport::MemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> (ConnectionManager, MemoryTransport, ManualScheduler) {
        let transport = MemoryTransport::new();
        let scheduler = ManualScheduler::new();
        let config = ClientConfig {
            heartbeat_interval: 0,
            ..ClientConfig::default()
        };
        let manager = ConnectionManager::new(
            config,
            Arc::new(transport.clone()),
            Arc::new(scheduler.clone()),
            SubscriptionRegistry::new(),
        )
        .unwrap();
        (manager, transport, scheduler)
    }

    #[test]
    fn test_starts_disconnected() {
        let (manager, transport, _) = manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_count(), 0);
    }

    #[test]
    fn test_connect_then_open() {
        let (manager, transport, _) = manager();

        manager.connect("secret");
        assert_eq!(manager.state(), ConnectionState::Connecting);

        let conn = transport.last().unwrap();
        assert_eq!(conn.token().as_deref(), Some("secret"));
        assert_eq!(conn.url().path(), "/ws");

        conn.accept();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.stats().connected_at.is_some());
    }

    #[test]
    fn test_handle_message_requires_live_transport() {
        let (manager, transport, _) = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        manager.subscribe("notification", move |_: &Event| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(manager.handle_message(r#"{"type":"notification"}"#).is_none());

        manager.connect("secret");
        transport.last().unwrap().accept();
        let outcome = manager.handle_message(r#"{"type":"notification"}"#).unwrap();

        assert_eq!(outcome.delivered, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_requires_connected() {
        let (manager, transport, _) = manager();
        assert!(matches!(
            manager.send(&ClientMessage::Ping),
            Err(ClientError::NotConnected)
        ));

        manager.connect("secret");
        assert!(manager.send(&ClientMessage::Ping).is_err());

        let conn = transport.last().unwrap();
        conn.accept();
        manager.send(&ClientMessage::Ping).unwrap();
        assert_eq!(conn.sent(), vec![r#"{"type":"ping"}"#.to_string()]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClientConfig {
            endpoint: "ftp://example.com".to_string(),
            ..ClientConfig::default()
        };
        let result = ConnectionManager::new(
            config,
            Arc::new(MemoryTransport::new()),
            Arc::new(ManualScheduler::new()),
            SubscriptionRegistry::new(),
        );
        assert!(matches!(result, Err(ClientError::InvalidEndpoint(_))));
    }
}
