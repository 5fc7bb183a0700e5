//! mastertab-core: Leader election among peers that share a key-value store.
//!
//! This crate provides:
//! - A broadcast transport built on the shared store's change notifications
//! - A leader-election state machine layered on that transport
//! - Store, identity, clock, scheduler and shutdown abstractions, with
//!   in-memory implementations for tests and in-process peers
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mastertab_core::{
//!     BroadcastTransport, ElectionConfig, LeaderElection, ManualClock, MemoryHub, TestPeer,
//! };
//!
//! let hub = MemoryHub::new();
//! let clock = Arc::new(ManualClock::new(1_000));
//! let peer = TestPeer::new(Arc::new(hub.connect()), clock, 7);
//! let transport = BroadcastTransport::connect(peer.ctx.clone()).unwrap();
//! let election = LeaderElection::new(peer.ctx.clone(), transport, ElectionConfig::default()).unwrap();
//!
//! election.start().unwrap();
//! assert!(!election.try_claim().unwrap()); // provisional
//! peer.scheduler.advance(Duration::from_millis(100));
//! assert!(election.is_leader().unwrap());
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod election;
pub mod identity;
pub mod peer_id;
pub mod record;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ElectionConfig};
pub use context::{Context, RandomSource, TestPeer};
pub use election::{ElectionError, ElectionState, LeaderElection};
pub use identity::{IdentityError, IdentityStore, MemoryIdentityStore};
pub use peer_id::{PeerId, PeerIdError};
pub use record::{BroadcastMessage, LeadershipRecord};
pub use scheduler::{ManualScheduler, Scheduler, Task, TaskHandle};
pub use shutdown::{ManualShutdown, ShutdownHook};
pub use store::{Delivery, HubOptions, MemoryHub, MemoryStore, SharedStore, StoreChange, StoreError};
pub use transport::{BroadcastTransport, TransportError};
