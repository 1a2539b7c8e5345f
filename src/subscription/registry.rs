use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::Serialize;
use smallvec::SmallVec;

use crate::metrics::DispatchMetrics;
use crate::websocket::Event;

/// Callback invoked with each event routed to its key
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
struct ListenerEntry {
    id: u64,
    listener: Listener,
}

type ListenerList = SmallVec<[ListenerEntry; 4]>;

#[derive(Default)]
struct RegistryInner {
    /// event_type -> listeners in registration order
    listeners: DashMap<String, ListenerList>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, event_type: &str, id: u64) -> bool {
        let removed = match self.listeners.get_mut(event_type) {
            Some(mut entries) => {
                let before = entries.len();
                entries.retain(|entry| entry.id != id);
                before != entries.len()
            }
            None => false,
        };

        // Drop the key once its last listener is gone
        self.listeners
            .remove_if(event_type, |_, entries| entries.is_empty());

        removed
    }
}

/// Type-keyed fan-out table between the connection manager and application
/// listeners.
///
/// Cloning yields another handle to the same table.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

/// Capability returned by [`SubscriptionRegistry::subscribe`].
///
/// Dropping it leaves the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Weak<RegistryInner>,
    event_type: String,
    id: u64,
}

impl Subscription {
    /// Remove exactly this listener. Returns `false` if it was already gone
    /// (unsubscribed before, registry cleared, or registry dropped).
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry.remove(&self.event_type, self.id);
        if removed {
            tracing::debug!(event_type = %self.event_type, listener_id = self.id, "Listener unsubscribed");
        }
        removed
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Result of fanning one event out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    /// Listeners that returned normally
    pub delivered: usize,
    /// Listeners that panicked
    pub failed: usize,
}

impl DispatchOutcome {
    pub fn is_unrouted(&self) -> bool {
        self.delivered == 0 && self.failed == 0
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event_type`.
    ///
    /// The same closure may be registered several times; each registration
    /// is revoked independently.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_listener(event_type, Arc::new(listener))
    }

    /// Register an already shared listener.
    pub fn subscribe_listener(&self, event_type: impl Into<String>, listener: Listener) -> Subscription {
        let event_type = event_type.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .listeners
            .entry(event_type.clone())
            .or_default()
            .push(ListenerEntry { id, listener });

        tracing::debug!(event_type = %event_type, listener_id = id, "Listener subscribed");

        Subscription {
            registry: Arc::downgrade(&self.inner),
            event_type,
            id,
        }
    }

    /// Deliver `event` to every listener registered for its type, in
    /// registration order.
    ///
    /// Listeners run against a snapshot taken before the first call, so a
    /// listener may subscribe or unsubscribe without deadlocking; changes
    /// apply from the next dispatch. A panicking listener is logged and
    /// skipped, and the rest still run.
    pub fn dispatch(&self, event: &Event) -> DispatchOutcome {
        let snapshot: SmallVec<[Listener; 4]> = match self.inner.listeners.get(&event.event_type) {
            Some(entries) => entries.iter().map(|entry| entry.listener.clone()).collect(),
            None => {
                DispatchMetrics::record_unrouted();
                tracing::trace!(event_type = %event.event_type, "No listeners for event");
                return DispatchOutcome::default();
            }
        };

        let mut outcome = DispatchOutcome::default();
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => outcome.delivered += 1,
                Err(panic) => {
                    outcome.failed += 1;
                    DispatchMetrics::record_listener_panic();
                    tracing::error!(
                        event_type = %event.event_type,
                        panic = %panic_message(&*panic),
                        "Listener panicked during dispatch"
                    );
                }
            }
        }

        DispatchMetrics::record_delivered(outcome.delivered as u64);
        outcome
    }

    /// Remove every key and listener.
    pub fn clear(&self) {
        self.inner.listeners.clear();
    }

    /// Number of event types with at least one listener
    pub fn len(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.listeners.is_empty()
    }

    pub fn contains_key(&self, event_type: &str) -> bool {
        self.inner.listeners.contains_key(event_type)
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.inner
            .listeners
            .get(event_type)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Total listeners across all event types
    pub fn total_listeners(&self) -> usize {
        self.inner.listeners.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.listeners.iter().map(|entry| entry.key().clone()).collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
