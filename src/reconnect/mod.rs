//! Reconnection policy
//!
//! - `ExponentialBackoff`: bounded attempt counter and delay calculator
//! - `Scheduler`: deferred execution, injectable so timing is testable

mod backoff;
mod scheduler;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use scheduler::{ManualScheduler, ScheduledTask, Scheduler, TimerHandle, TokioScheduler};
