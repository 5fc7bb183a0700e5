//! Cancellable delayed tasks.
//!
//! The settle delay after a leadership claim is the only timer in the
//! protocol. Routing it through `Scheduler` lets tests drive it with
//! `ManualScheduler` instead of sleeping.

use crate::clock::{Clock, ManualClock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Work to run once the delay elapses.
pub type Task = Box<dyn FnOnce() + Send>;

/// Handle to a scheduled task. Cancelling is idempotent and has no effect
/// once the task has started.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub trait Scheduler: Send + Sync {
    /// Run `task` after `delay` unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;
}

struct Entry {
    due: u64,
    seq: u64,
    handle: TaskHandle,
    task: Task,
}

/// Scheduler on fake time, sharing a `ManualClock` with the rest of the peer.
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    queue: Mutex<Vec<Entry>>,
    next_seq: AtomicU64,
}

impl ManualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            queue: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Number of tasks still waiting, cancelled ones excluded.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|entry| !entry.handle.is_cancelled())
            .count()
    }

    /// Move the clock forward, running every task that falls due on the way
    /// in due-time order. Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.clock.now_millis() + by.as_millis() as u64;
        let mut ran = 0;

        loop {
            let next = {
                let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                queue.retain(|entry| !entry.handle.is_cancelled());
                let position = queue
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.due <= target)
                    .min_by_key(|(_, entry)| (entry.due, entry.seq))
                    .map(|(i, _)| i);
                position.map(|i| queue.remove(i))
            };

            match next {
                Some(entry) => {
                    if entry.due > self.clock.now_millis() {
                        self.clock.set(entry.due);
                    }
                    // Tasks run without the queue lock so they may reschedule.
                    (entry.task)();
                    ran += 1;
                }
                None => break,
            }
        }

        self.clock.set(target.max(self.clock.now_millis()));
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Entry {
                due: self.clock.now_millis() + delay.as_millis() as u64,
                seq,
                handle: handle.clone(),
                task,
            });
        handle
    }
}
