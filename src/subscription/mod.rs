//! Subscription registry: event-type key -> ordered listeners

mod registry;

pub use registry::{DispatchOutcome, Listener, Subscription, SubscriptionRegistry};
