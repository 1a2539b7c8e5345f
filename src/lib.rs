// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Connection layer
pub mod connection_manager;
pub mod reconnect;
pub mod transport;
pub mod websocket;

// Fan-out
pub mod subscription;

// Application facade
pub mod client;

pub use client::NotificationClient;
pub use config::ClientConfig;
pub use connection_manager::{ConnectionManager, ConnectionState, ConnectionStats};
pub use error::{ClientError, Result};
pub use subscription::{Subscription, SubscriptionRegistry};
pub use websocket::{ClientMessage, Event};
