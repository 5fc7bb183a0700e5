//! Per-peer context shared by the transport and the election.
//!
//! Everything the protocol touches from the outside world lives here, so a
//! test can swap the store, the clock, the timers and the randomness for
//! deterministic fakes.

use crate::clock::{Clock, ManualClock, SystemClock};
use crate::identity::{IdentityStore, MemoryIdentityStore};
use crate::scheduler::{ManualScheduler, Scheduler};
use crate::shutdown::{ManualShutdown, ShutdownHook};
use crate::store::SharedStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Seedable source of jitter.
pub struct RandomSource {
    rng: Mutex<StdRng>,
}

impl RandomSource {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Uniform duration in `[min, max]`, at millisecond resolution.
    pub fn duration_between(&self, min: Duration, max: Duration) -> Duration {
        let min_ms = min.as_millis() as u64;
        let max_ms = max.as_millis() as u64;
        if max_ms <= min_ms {
            return Duration::from_millis(min_ms);
        }
        let ms = self
            .rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .random_range(min_ms..=max_ms);
        Duration::from_millis(ms)
    }
}

/// Handles to a peer's external collaborators.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn SharedStore>,
    pub identity: Arc<dyn IdentityStore>,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<dyn Scheduler>,
    pub shutdown: Arc<dyn ShutdownHook>,
    pub random: Arc<RandomSource>,
}

impl Context {
    /// Context on real time with the given collaborators.
    pub fn new(
        store: Arc<dyn SharedStore>,
        identity: Arc<dyn IdentityStore>,
        scheduler: Arc<dyn Scheduler>,
        shutdown: Arc<dyn ShutdownHook>,
    ) -> Self {
        Self {
            store,
            identity,
            clock: Arc::new(SystemClock),
            scheduler,
            shutdown,
            random: Arc::new(RandomSource::from_entropy()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_random(mut self, random: RandomSource) -> Self {
        self.random = Arc::new(random);
        self
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

/// A fully fake peer environment: manual clock, manual timers, manual
/// shutdown and an in-memory identity store.
///
/// Several peers can share one `ManualClock` so that advancing time on one
/// scheduler is seen by every peer.
pub struct TestPeer {
    pub ctx: Context,
    pub clock: Arc<ManualClock>,
    pub scheduler: Arc<ManualScheduler>,
    pub shutdown: Arc<ManualShutdown>,
    pub identity: Arc<MemoryIdentityStore>,
}

impl TestPeer {
    pub fn new(store: Arc<dyn SharedStore>, clock: Arc<ManualClock>, seed: u64) -> Self {
        let scheduler = Arc::new(ManualScheduler::new(Arc::clone(&clock)));
        let shutdown = Arc::new(ManualShutdown::new());
        let identity = Arc::new(MemoryIdentityStore::new());
        let ctx = Context {
            store,
            identity: identity.clone(),
            clock: clock.clone(),
            scheduler: scheduler.clone(),
            shutdown: shutdown.clone(),
            random: Arc::new(RandomSource::seeded(seed)),
        };
        Self {
            ctx,
            clock,
            scheduler,
            shutdown,
            identity,
        }
    }
}
