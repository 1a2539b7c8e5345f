//! Connection manager: transport lifecycle, frame decoding and reconnection

mod manager;
mod stats;
mod types;

pub use manager::ConnectionManager;
pub use stats::ConnectionStats;
pub use types::ConnectionState;
