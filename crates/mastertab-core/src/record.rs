//! Records persisted in the shared store.
//!
//! Both shapes carry a format version `v`. Records from writers that predate
//! the version field are read as version 1, and `time` is accepted either as
//! an integer or as the decimal string some older writers produced.

use crate::peer_id::PeerId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Format version written by this crate.
pub const RECORD_VERSION: u32 = 1;

fn default_version() -> u32 {
    RECORD_VERSION
}

fn deserialize_millis<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Number(u64),
        Text(String),
    }

    match Millis::deserialize(d)? {
        Millis::Number(n) => Ok(n),
        Millis::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Who currently holds leadership, and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipRecord {
    #[serde(rename = "v", default = "default_version")]
    pub version: u32,
    #[serde(rename = "tabId")]
    pub peer_id: PeerId,
    /// Epoch milliseconds at which the claim was written.
    #[serde(rename = "time", deserialize_with = "deserialize_millis")]
    pub claimed_at: u64,
}

impl LeadershipRecord {
    pub fn new(peer_id: PeerId, claimed_at: u64) -> Self {
        Self {
            version: RECORD_VERSION,
            peer_id,
            claimed_at,
        }
    }

    /// Parse a stored value. Anything unreadable counts as no record.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Age of the claim at `now`, saturating at zero for claims from the future.
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.claimed_at)
    }
}

/// The single pending message of a broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "v", default = "default_version")]
    pub version: u32,
    /// Epoch milliseconds at which the message was dispatched.
    #[serde(rename = "time", deserialize_with = "deserialize_millis")]
    pub sent_at: u64,
    #[serde(rename = "detail", default)]
    pub payload: Value,
}

impl BroadcastMessage {
    pub fn new(sent_at: u64, payload: Value) -> Self {
        Self {
            version: RECORD_VERSION,
            sent_at,
            payload,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
