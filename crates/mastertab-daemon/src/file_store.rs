//! Directory-backed shared store.
//!
//! Every key is one file `<encoded key>.value` inside the store directory.
//! Writes go to a hidden temp file first and are renamed into place, so a
//! reader never sees a half-written value. Any number of processes on the
//! same machine can open the same directory.
//!
//! The change feed comes from a notify debouncer watching the directory.
//! The filesystem reports a process's own writes back to it, so this store
//! echoes to the writer; the broadcast transport suppresses those echoes.

use mastertab_core::store::{Result, SharedStore, StoreChange, StoreError, StoreListener};
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, trace};

const VALUE_EXTENSION: &str = ".value";

/// Tunables for a `FileStore`.
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Debounce window of the change feed (default: 20ms)
    pub debounce: Duration,
    /// Reject writes whose key plus value exceed this many bytes.
    pub max_value_bytes: Option<usize>,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(20),
            max_value_bytes: None,
        }
    }
}

/// Last value seen per key, used to fill in `old_value` and to drop
/// events that did not change anything.
type ValueCache = Arc<Mutex<HashMap<String, String>>>;

type Listeners = Arc<Mutex<Vec<StoreListener>>>;

pub struct FileStore {
    root: PathBuf,
    options: FileStoreOptions,
    listeners: Listeners,
    cache: ValueCache,
    /// Debouncer handle (must keep alive); created on first `watch`.
    debouncer: Mutex<Option<Debouncer<notify::RecommendedWatcher>>>,
    temp_counter: AtomicU64,
}

impl FileStore {
    /// Open (creating if needed) the store directory.
    pub fn open(root: impl Into<PathBuf>, options: FileStoreOptions) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        // Canonicalize so watcher paths match ours (macOS /var -> /private/var).
        let root = root.canonicalize().unwrap_or(root);

        Ok(Self {
            root,
            options,
            listeners: Arc::new(Mutex::new(Vec::new())),
            cache: Arc::new(Mutex::new(HashMap::new())),
            debouncer: Mutex::new(None),
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", encode_key(key), VALUE_EXTENSION))
    }

    fn start_watching(&self) -> Result<()> {
        let mut slot = self.debouncer.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Ok(());
        }

        // Seed the cache so the first change of each key has an old value.
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            for (key, value) in scan(&self.root) {
                cache.insert(key, value);
            }
        }

        let root = self.root.clone();
        let cache = Arc::clone(&self.cache);
        let listeners = Arc::clone(&self.listeners);
        let mut debouncer = new_debouncer(
            self.options.debounce,
            move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(change) = process_event(&event, &root, &cache) {
                            notify_listeners(&listeners, &change);
                        }
                    }
                }
                Err(e) => {
                    error!("Store watcher error: {}", e);
                }
            },
        )
        .map_err(|e| StoreError::Io(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::NonRecursive)
            .map_err(|e| StoreError::Io(e.to_string()))?;

        debug!("Watching store directory {:?}", self.root);
        *slot = Some(debouncer);
        Ok(())
    }
}

impl SharedStore for FileStore {
    fn probe(&self) -> Result<()> {
        let metadata = fs::metadata(&self.root).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(StoreError::Unavailable(format!("{:?} is not a directory", self.root)));
        }
        if metadata.permissions().readonly() {
            return Err(StoreError::Unavailable(format!("{:?} is read-only", self.root)));
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        read_value(&self.value_path(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Some(limit) = self.options.max_value_bytes {
            let size = key.len() + value.len();
            if size > limit {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    size,
                    limit,
                });
            }
        }

        let path = self.value_path(key);
        let temp = self.root.join(format!(
            ".{}.{}-{}.tmp",
            encode_key(key),
            std::process::id(),
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&temp, value).map_err(|e| map_write_error(e, key))?;
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(map_write_error(e, key));
        }
        trace!("Stored {} ({} bytes)", key, value.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    fn watch(&self, listener: StoreListener) -> Result<()> {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
        self.start_watching()
    }
}

fn map_write_error(e: std::io::Error, key: &str) -> StoreError {
    if e.kind() == ErrorKind::StorageFull {
        StoreError::QuotaExceeded {
            key: key.to_string(),
            size: 0,
            limit: 0,
        }
    } else {
        StoreError::Io(e.to_string())
    }
}

fn read_value(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(e.to_string())),
    }
}

/// All readable values currently in the store directory.
fn scan(root: &Path) -> Vec<(String, String)> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let key = key_from_file_name(name.to_str()?)?;
            let value = fs::read_to_string(entry.path()).ok()?;
            Some((key, value))
        })
        .collect()
}

/// Turn a debounced filesystem event into a store change, if it is one.
fn process_event(event: &DebouncedEvent, root: &Path, cache: &ValueCache) -> Option<StoreChange> {
    let path = &event.path;
    if path.parent() != Some(root) {
        return None;
    }
    let key = key_from_file_name(path.file_name()?.to_str()?)?;

    // The event kind does not say what happened; the file's presence does.
    let new_value = match read_value(path) {
        Ok(value) => value,
        Err(e) => {
            debug!("Could not read {:?} after change: {}", path, e);
            return None;
        }
    };

    let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
    let old_value = match &new_value {
        Some(value) => cache.insert(key.clone(), value.clone()),
        None => cache.remove(&key),
    };
    if old_value == new_value {
        // Nothing changed (spurious event, or a rewrite with the same value)
        return None;
    }

    trace!("Store change: {}", key);
    Some(StoreChange {
        key,
        old_value,
        new_value,
    })
}

fn notify_listeners(listeners: &Listeners, change: &StoreChange) {
    // Clone the list so a listener may register another one.
    let listeners: Vec<StoreListener> = listeners
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .map(Arc::clone)
        .collect();

    for listener in listeners {
        listener(change);
    }
}

/// File-name-safe form of a key: `[A-Za-z0-9_-]` kept, every other byte
/// written as `%XX`.
pub fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

pub fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

/// Key stored in `file_name`, or `None` for temp and foreign files.
fn key_from_file_name(file_name: &str) -> Option<String> {
    if file_name.starts_with('.') {
        return None;
    }
    decode_key(file_name.strip_suffix(VALUE_EXTENSION)?)
}
