//! Election configuration.
//!
//! Every key and channel name is derived from one namespace, so several
//! independent elections can share a store as long as their namespaces
//! differ.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Namespace cannot be empty")]
    EmptyNamespace,
    #[error("Settle delay minimum {min:?} exceeds maximum {max:?}")]
    InvertedSettleDelay { min: Duration, max: Duration },
    #[error("Obsolescence threshold must be positive")]
    ZeroObsolescence,
}

/// Tunables for one leader election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Prefix for every store key and channel name.
    pub namespace: String,
    /// Age after which a leadership record is presumed abandoned (default: 1h)
    pub obsolete_after: Duration,
    /// Lower bound of the randomized wait before trusting a claim (default: 10ms)
    pub settle_delay_min: Duration,
    /// Upper bound of the randomized wait before trusting a claim (default: 50ms)
    pub settle_delay_max: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            namespace: "master_tab".to_string(),
            obsolete_after: Duration::from_secs(60 * 60),
            settle_delay_min: Duration::from_millis(10),
            settle_delay_max: Duration::from_millis(50),
        }
    }
}

impl ElectionConfig {
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        if self.settle_delay_min > self.settle_delay_max {
            return Err(ConfigError::InvertedSettleDelay {
                min: self.settle_delay_min,
                max: self.settle_delay_max,
            });
        }
        if self.obsolete_after.is_zero() {
            return Err(ConfigError::ZeroObsolescence);
        }
        Ok(())
    }

    /// Shared-store key holding the leadership record.
    pub fn leader_key(&self) -> String {
        format!("{}_master_id", self.namespace)
    }

    /// Identity-store key holding this peer's id.
    pub fn peer_id_key(&self) -> String {
        format!("{}_id", self.namespace)
    }

    /// Broadcast when the leader goes away; every peer re-contends.
    pub fn leader_left_channel(&self) -> String {
        format!("{}_master_left_event", self.namespace)
    }

    /// Local-only notification carrying this peer's new leadership flag.
    pub fn leader_changed_channel(&self) -> String {
        format!("{}_master_changed_event", self.namespace)
    }

    /// Broadcast to halt the election on every peer.
    pub fn shutdown_channel(&self) -> String {
        format!("{}_shutdown_event", self.namespace)
    }
}
