//! Deferred task execution used for reconnect and keepalive timers.
//!
//! The connection manager never sleeps itself; it hands a closure and a delay
//! to a [`Scheduler`]. [`TokioScheduler`] runs it on the runtime after the
//! delay, [`ManualScheduler`] keeps it until a test fires it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::error::{ClientError, Result};

pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs a task once after a delay.
///
/// Implementations must not run the task synchronously inside `schedule`.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> TimerHandle;
}

/// Cancellation handle for a scheduled task
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    pub fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            cancelled,
            abort: None,
        }
    }

    fn with_abort(cancelled: Arc<AtomicBool>, abort: AbortHandle) -> Self {
        Self {
            cancelled,
            abort: Some(abort),
        }
    }

    /// Prevent the task from running if it has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Scheduler backed by `tokio::time::sleep`
#[derive(Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    /// Bind to the runtime of the calling context.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| ClientError::Runtime(format!("no tokio runtime available: {}", e)))?;
        Ok(Self { runtime })
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::Acquire) {
                task();
            }
        });

        TimerHandle::with_abort(cancelled, join.abort_handle())
    }
}

struct PendingTimer {
    delay: Duration,
    task: Option<ScheduledTask>,
    cancelled: Arc<AtomicBool>,
}

/// Scheduler that only runs tasks when told to.
///
/// Every scheduled delay is recorded, so backoff sequences can be asserted
/// without waiting on a clock.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    timers: Arc<Mutex<Vec<PendingTimer>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay ever scheduled, in scheduling order (fired and cancelled included).
    pub fn delays(&self) -> Vec<Duration> {
        self.timers.lock().iter().map(|t| t.delay).collect()
    }

    /// Tasks that are neither fired nor cancelled.
    pub fn pending(&self) -> usize {
        self.timers
            .lock()
            .iter()
            .filter(|t| t.task.is_some() && !t.cancelled.load(Ordering::Acquire))
            .count()
    }

    /// Run the oldest pending task. Returns `false` when nothing was pending.
    pub fn fire_next(&self) -> bool {
        let task = {
            let mut timers = self.timers.lock();
            timers
                .iter_mut()
                .find(|t| t.task.is_some() && !t.cancelled.load(Ordering::Acquire))
                .and_then(|t| t.task.take())
        };

        // Run outside the lock; the task may schedule again.
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Fire pending tasks until none remain, including ones scheduled while firing.
    /// Returns the number of tasks run.
    pub fn fire_all(&self) -> usize {
        let mut fired = 0;
        while self.fire_next() {
            fired += 1;
        }
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.timers.lock().push(PendingTimer {
            delay,
            task: Some(task),
            cancelled: cancelled.clone(),
        });
        TimerHandle::new(cancelled)
    }
}
