//! Per-peer identity storage.
//!
//! Holds values that belong to exactly one peer and survive reloads of that
//! peer, but are never shared with other peers (the peer id lives here).
//!
//! Implementations:
//! - `MemoryIdentityStore` - process lifetime, used by tests and short-lived peers
//! - `FileIdentityStore` (in mastertab-daemon) - a JSON file owned by one peer

use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity store unavailable: {0}")]
    Unavailable(String),

    #[error("Identity store IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Storage scoped to a single peer.
pub trait IdentityStore: Send + Sync {
    /// Check that the store can be used at all.
    fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory identity store.
#[derive(Default)]
pub struct MemoryIdentityStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
