//! PeerId: Unique identifier for one running peer process.
//!
//! Generated ids are 16 lowercase hex chars built from a random u64.
//! Ids read back from the shared store are kept verbatim, since peers
//! written by other implementations may use any non-empty string.

use crate::identity::{IdentityError, IdentityStore};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerIdError {
    #[error("Peer ID cannot be empty")]
    Empty,
}

/// A unique identifier for a peer.
///
/// # Examples
/// ```
/// use mastertab_core::PeerId;
///
/// let peer_id = PeerId::generate();
/// assert_eq!(peer_id.as_str().len(), 16);
///
/// let parsed: PeerId = "KH-1700000000000-42".parse().unwrap();
/// assert_eq!(parsed.as_str(), "KH-1700000000000-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a new random peer ID.
    ///
    /// Never produces the all-zero id.
    pub fn generate() -> Self {
        use rand::Rng;
        loop {
            let id: u64 = rand::rng().random();
            if id != 0 {
                return Self(format!("{:016x}", id));
            }
        }
    }

    /// Load this peer's id from its identity store, creating and persisting
    /// a fresh one on first use.
    ///
    /// A stored value that is not a valid id is replaced.
    pub fn load_or_create(store: &dyn IdentityStore, key: &str) -> Result<Self, IdentityError> {
        if let Some(existing) = store.get(key)? {
            if let Ok(id) = existing.parse::<PeerId>() {
                debug!("Loaded peer ID {} from identity store", id);
                return Ok(id);
            }
        }

        let id = Self::generate();
        store.set(key, id.as_str())?;
        debug!("Generated peer ID {}", id);
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(PeerIdError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
