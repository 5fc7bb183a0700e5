//! SharedStore trait: the persistent key-value store every peer can see.
//!
//! Writes made through one peer's handle are announced to the listeners of
//! every other handle as a `StoreChange`. Some stores also announce a write
//! to the writer itself; callers must tolerate that echo.
//!
//! Implementations:
//! - `MemoryHub` / `MemoryStore` - shared in-memory store for tests and in-process peers
//! - `FileStore` (in mastertab-daemon) - one file per key, change feed from the filesystem

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Shared store unavailable: {0}")]
    Unavailable(String),

    #[error("Quota exceeded writing {key}: {size} bytes over limit of {limit}")]
    QuotaExceeded {
        key: String,
        size: usize,
        limit: usize,
    },

    #[error("Shared store IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A change observed on the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    pub old_value: Option<String>,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

/// Callback invoked for every change made elsewhere.
pub type StoreListener = Arc<dyn Fn(&StoreChange) + Send + Sync>;

/// One peer's handle onto the shared store.
pub trait SharedStore: Send + Sync {
    /// Check that the store can be used at all.
    fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite `key`. There is no compare-and-set.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Register a listener for changes made through other handles.
    fn watch(&self, listener: StoreListener) -> Result<()>;
}

/// When a `MemoryHub` hands changes to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Listeners run inside the writing call, after the write is visible.
    #[default]
    Immediate,
    /// Changes queue up until `MemoryHub::flush` is called.
    Deferred,
}

/// Behaviour knobs for a `MemoryHub`.
#[derive(Debug, Clone, Default)]
pub struct HubOptions {
    pub delivery: Delivery,
    /// Also notify the handle that made the write.
    pub echo_to_writer: bool,
    /// Reject writes whose key plus value exceed this many bytes.
    pub max_value_bytes: Option<usize>,
}

struct HubInner {
    options: HubOptions,
    values: Mutex<HashMap<String, String>>,
    listeners: Mutex<Vec<(usize, StoreListener)>>,
    pending: Mutex<VecDeque<(usize, StoreChange)>>,
    next_handle: AtomicUsize,
    available: AtomicBool,
}

/// Shared in-memory store. Every `connect()` call yields a new peer handle.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::with_options(HubOptions::default())
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: HubOptions) -> Self {
        Self {
            inner: Arc::new(HubInner {
                options,
                values: Mutex::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
                pending: Mutex::new(VecDeque::new()),
                next_handle: AtomicUsize::new(0),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Open a handle for a new peer.
    pub fn connect(&self) -> MemoryStore {
        let handle = self.inner.next_handle.fetch_add(1, Ordering::Relaxed);
        MemoryStore {
            hub: Arc::clone(&self.inner),
            handle,
        }
    }

    /// Read a key directly, bypassing any handle.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Simulate the store disappearing (or coming back).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::Relaxed);
    }

    /// Number of changes waiting for `flush`.
    pub fn pending(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver queued changes, including any queued while delivering.
    ///
    /// Returns the number of changes delivered.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            match next {
                Some((origin, change)) => {
                    self.inner.deliver(origin, &change);
                    delivered += 1;
                }
                None => return delivered,
            }
        }
    }
}

impl HubInner {
    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory hub switched off".into()))
        }
    }

    fn announce(&self, origin: usize, change: StoreChange) {
        match self.options.delivery {
            Delivery::Immediate => self.deliver(origin, &change),
            Delivery::Deferred => self
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back((origin, change)),
        }
    }

    fn deliver(&self, origin: usize, change: &StoreChange) {
        // Clone the listener list so listeners may write to the store.
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(handle, _)| *handle != origin || self.options.echo_to_writer)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        trace!("Delivering change of {} to {} listener(s)", change.key, listeners.len());
        for listener in listeners {
            listener(change);
        }
    }
}

/// A single peer's handle onto a `MemoryHub`.
pub struct MemoryStore {
    hub: Arc<HubInner>,
    handle: usize,
}

impl SharedStore for MemoryStore {
    fn probe(&self) -> Result<()> {
        self.hub.check_available()
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.hub.check_available()?;
        Ok(self
            .hub
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.hub.check_available()?;

        if let Some(limit) = self.hub.options.max_value_bytes {
            let size = key.len() + value.len();
            if size > limit {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    size,
                    limit,
                });
            }
        }

        let old_value = self
            .hub
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());

        // Writing an identical value is not a change.
        if old_value.as_deref() == Some(value) {
            return Ok(());
        }

        self.hub.announce(
            self.handle,
            StoreChange {
                key: key.to_string(),
                old_value,
                new_value: Some(value.to_string()),
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.hub.check_available()?;

        let old_value = self
            .hub
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);

        if old_value.is_some() {
            self.hub.announce(
                self.handle,
                StoreChange {
                    key: key.to_string(),
                    old_value,
                    new_value: None,
                },
            );
        }
        Ok(())
    }

    fn watch(&self, listener: StoreListener) -> Result<()> {
        self.hub.check_available()?;
        self.hub
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((self.handle, listener));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(store: &MemoryStore) -> Arc<Mutex<Vec<StoreChange>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        store
            .watch(Arc::new(move |change: &StoreChange| {
                seen_clone.lock().unwrap().push(change.clone());
            }))
            .unwrap();
        seen
    }

    #[test]
    fn test_values_are_shared() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        let b = hub.connect();

        a.set("key", "value").unwrap();
        assert_eq!(b.get("key").unwrap().as_deref(), Some("value"));

        b.remove("key").unwrap();
        assert!(a.get("key").unwrap().is_none());
    }

    #[test]
    fn test_writer_not_notified() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let seen_a = recorder(&a);
        let seen_b = recorder(&b);

        a.set("key", "one").unwrap();

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(
            seen_b.lock().unwrap().as_slice(),
            &[StoreChange {
                key: "key".into(),
                old_value: None,
                new_value: Some("one".into()),
            }]
        );
    }

    #[test]
    fn test_echo_to_writer() {
        let hub = MemoryHub::with_options(HubOptions {
            echo_to_writer: true,
            ..Default::default()
        });
        let a = hub.connect();
        let seen_a = recorder(&a);

        a.set("key", "one").unwrap();
        assert_eq!(seen_a.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_identical_write_is_silent() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let seen_b = recorder(&b);

        a.set("key", "same").unwrap();
        a.set("key", "same").unwrap();
        assert_eq!(seen_b.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_missing_is_silent() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let seen_b = recorder(&b);

        a.remove("missing").unwrap();
        assert!(seen_b.lock().unwrap().is_empty());

        a.set("key", "v").unwrap();
        a.remove("key").unwrap();
        let seen = seen_b.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].old_value.as_deref(), Some("v"));
        assert!(seen[1].new_value.is_none());
    }

    #[test]
    fn test_deferred_delivery() {
        let hub = MemoryHub::with_options(HubOptions {
            delivery: Delivery::Deferred,
            ..Default::default()
        });
        let a = hub.connect();
        let b = hub.connect();
        let seen_b = recorder(&b);

        a.set("key", "one").unwrap();
        a.set("key", "two").unwrap();
        assert!(seen_b.lock().unwrap().is_empty());
        assert_eq!(hub.pending(), 2);

        assert_eq!(hub.flush(), 2);
        let seen = seen_b.lock().unwrap();
        assert_eq!(seen[0].new_value.as_deref(), Some("one"));
        assert_eq!(seen[1].old_value.as_deref(), Some("one"));
        assert_eq!(seen[1].new_value.as_deref(), Some("two"));
    }

    #[test]
    fn test_quota_exceeded() {
        let hub = MemoryHub::with_options(HubOptions {
            max_value_bytes: Some(8),
            ..Default::default()
        });
        let a = hub.connect();

        a.set("k", "short").unwrap();
        let err = a.set("k", "much too long").unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { limit: 8, .. }));
        assert_eq!(hub.get("k").as_deref(), Some("short"));
    }

    #[test]
    fn test_unavailable() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        hub.set_available(false);

        assert!(matches!(a.probe(), Err(StoreError::Unavailable(_))));
        assert!(a.get("k").is_err());
        assert!(a.set("k", "v").is_err());

        hub.set_available(true);
        assert!(a.probe().is_ok());
    }

    #[test]
    fn test_listener_may_write() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        let b = Arc::new(hub.connect());
        let b_clone = Arc::clone(&b);
        b.watch(Arc::new(move |change: &StoreChange| {
            if change.key == "ping" {
                b_clone.set("pong", "1").unwrap();
            }
        }))
        .unwrap();

        a.set("ping", "1").unwrap();
        assert_eq!(hub.get("pong").as_deref(), Some("1"));
    }
}
