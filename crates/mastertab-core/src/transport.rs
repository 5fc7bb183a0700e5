//! Broadcast transport over the shared store.
//!
//! Two delivery paths feed the same per-channel subscriber lists:
//! - `dispatch_local` invokes this peer's subscribers synchronously
//! - `dispatch_global` also writes `{time, detail}` under the channel key, and
//!   every other peer picks it up from its store change feed
//!
//! A channel holds at most one pending message; a newer dispatch overwrites
//! an older one whether or not anyone saw it. Stores that echo a write back
//! to its writer are handled by remembering the time of the last message
//! this peer sent on each channel.

use crate::context::Context;
use crate::record::BroadcastMessage;
use crate::store::{StoreChange, StoreError};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Subscriber callback. Receives the message payload.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

pub struct BroadcastTransport {
    ctx: Context,
    subscriptions: RwLock<HashMap<String, Vec<Callback>>>,
    /// Time of the last message this peer wrote, per channel.
    last_sent: Mutex<HashMap<String, u64>>,
}

impl BroadcastTransport {
    /// Create a transport and attach it to the store's change feed.
    pub fn connect(ctx: Context) -> Result<Arc<Self>> {
        let transport = Arc::new(Self {
            ctx,
            subscriptions: RwLock::new(HashMap::new()),
            last_sent: Mutex::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&transport);
        transport.ctx.store.watch(Arc::new(move |change: &StoreChange| {
            if let Some(transport) = weak.upgrade() {
                transport.on_store_change(change);
            }
        }))?;

        Ok(transport)
    }

    /// Add a callback for `channel`. Callbacks accumulate and run in the
    /// order they were added.
    pub fn subscribe(&self, channel: &str, callback: impl Fn(&Value) + Send + Sync + 'static) {
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(channel.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Drop every callback for `channel`. Returns how many were removed.
    pub fn unsubscribe(&self, channel: &str) -> usize {
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(channel)
            .map(|callbacks| callbacks.len())
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Invoke this peer's subscribers of `channel`. Returns how many ran.
    pub fn dispatch_local(&self, channel: &str, payload: &Value) -> usize {
        // Clone the callback list so callbacks may subscribe or dispatch.
        let callbacks: Vec<Callback> = self
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel)
            .map(|callbacks| callbacks.iter().map(Arc::clone).collect())
            .unwrap_or_default();

        trace!("Dispatching {} to {} local subscriber(s)", channel, callbacks.len());
        for callback in &callbacks {
            callback(payload);
        }
        callbacks.len()
    }

    /// Publish `payload` on `channel` to every peer, this one included.
    ///
    /// Nothing is delivered if the store write fails.
    pub fn dispatch_global<T: Serialize + ?Sized>(&self, channel: &str, payload: &T) -> Result<()> {
        let payload = serde_json::to_value(payload)?;
        let sent_at = self.ctx.now_millis();
        let encoded = BroadcastMessage::new(sent_at, payload.clone()).encode()?;

        // Record before writing: an echoing store may call back inside `set`.
        let previous = self
            .last_sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.to_string(), sent_at);

        if let Err(e) = self.ctx.store.set(channel, &encoded) {
            let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
            match previous {
                Some(time) => last_sent.insert(channel.to_string(), time),
                None => last_sent.remove(channel),
            };
            return Err(e.into());
        }

        debug!("Dispatched {} globally at {}", channel, sent_at);
        self.dispatch_local(channel, &payload);
        Ok(())
    }

    fn on_store_change(&self, change: &StoreChange) {
        let Some(raw) = change.new_value.as_deref() else {
            return;
        };
        if raw.is_empty() {
            return;
        }

        let Some(message) = BroadcastMessage::parse(raw) else {
            trace!("Ignoring unparseable value under {}", change.key);
            return;
        };

        let is_echo = self
            .last_sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&change.key)
            .is_some_and(|sent_at| *sent_at == message.sent_at);
        if is_echo {
            trace!("Suppressing echo of own message on {}", change.key);
            return;
        }

        self.dispatch_local(&change.key, &message.payload);
    }
}
