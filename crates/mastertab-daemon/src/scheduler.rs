//! Scheduler backed by the tokio runtime.

use mastertab_core::scheduler::{Scheduler, Task, TaskHandle};
use std::time::Duration;
use tokio::runtime::Handle;

/// Runs tasks on a tokio runtime after a `tokio::time::sleep`.
///
/// Holds a runtime handle, so tasks can be scheduled from threads outside the
/// runtime (the store watcher calls back on its own thread).
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler on the runtime of the calling task.
    ///
    /// Panics outside a tokio runtime, like `Handle::current`.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let cancelled = handle.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !cancelled.is_cancelled() {
                task();
            }
        });
        handle
    }
}
