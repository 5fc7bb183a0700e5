//! Graceful-termination hook.
//!
//! A hook fires at most once and only on graceful termination. Crashes and
//! forced kills never run it, which is why a dead leader's record can linger
//! until it goes obsolete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

pub type ShutdownCallback = Box<dyn FnOnce() + Send>;

pub trait ShutdownHook: Send + Sync {
    /// Register a callback to run when the peer begins graceful termination.
    fn register(&self, callback: ShutdownCallback);
}

/// Shutdown hook fired explicitly with `trigger`.
///
/// Also serves as the building block for process-level hooks (the daemon
/// fires one from its ctrl-c handler).
#[derive(Default)]
pub struct ManualShutdown {
    callbacks: Mutex<Vec<ShutdownCallback>>,
    fired: AtomicBool,
}

impl ManualShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every registered callback. Only the first call does anything.
    ///
    /// Returns the number of callbacks run.
    pub fn trigger(&self) -> usize {
        if self.fired.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let callbacks = std::mem::take(&mut *self.callbacks.lock().unwrap_or_else(|e| e.into_inner()));
        debug!("Running {} shutdown callback(s)", callbacks.len());
        let count = callbacks.len();
        for callback in callbacks {
            callback();
        }
        count
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl ShutdownHook for ManualShutdown {
    fn register(&self, callback: ShutdownCallback) {
        if self.has_fired() {
            debug!("Shutdown already fired, dropping late callback");
            return;
        }
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }
}
