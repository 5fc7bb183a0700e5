//! Leader election over the shared store.
//!
//! One leadership record lives under the configured key. A peer claims an
//! empty slot by writing itself into it, waits a randomized settle delay,
//! and then trusts whatever the slot says. There is no compare-and-set:
//! peers that claim inside the same jitter window race, and the last write
//! seen before each settle check wins. This keeps correctness probabilistic,
//! which the protocol accepts.
//!
//! # Lifecycle
//!
//! 1. `start()` drops an obsolete record, loads the peer id, hooks graceful
//!    shutdown and listens for "leader left" announcements
//! 2. `try_claim()` contends; the definitive answer arrives as a
//!    leadership-changed notification once the claim has settled
//! 3. `relinquish()` empties the slot and tells every other peer to contend
//!
//! A crashed leader never relinquishes. Its record stays until some peer's
//! staleness check finds it older than `obsolete_after`.

use crate::config::{ConfigError, ElectionConfig};
use crate::context::Context;
use crate::identity::IdentityError;
use crate::peer_id::PeerId;
use crate::record::LeadershipRecord;
use crate::scheduler::TaskHandle;
use crate::store::StoreError;
use crate::transport::{BroadcastTransport, TransportError};
use serde_json::Value;
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to encode leadership record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Election has not been started")]
    NotStarted,
}

pub type Result<T> = std::result::Result<T, ElectionError>;

/// Where this peer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// No record in the store (as far as this peer last looked)
    Unclaimed,
    /// Claim written, waiting out the settle delay
    SettlingClaim,
    /// The record names this peer
    Leader,
    /// The record names another peer
    Follower,
    /// Halted by a system-wide stop or by shutdown
    Stopped,
}

struct Inner {
    state: ElectionState,
    peer_id: Option<PeerId>,
    settle: Option<TaskHandle>,
    started: bool,
    /// Set while this peer announces its own departure.
    relinquishing: bool,
}

pub struct LeaderElection {
    ctx: Context,
    transport: Arc<BroadcastTransport>,
    config: ElectionConfig,
    leader_key: String,
    leader_left: String,
    leader_changed: String,
    shutdown_channel: String,
    inner: Mutex<Inner>,
    weak_self: Weak<LeaderElection>,
}

impl LeaderElection {
    pub fn new(
        ctx: Context,
        transport: Arc<BroadcastTransport>,
        config: ElectionConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        Ok(Arc::new_cyclic(|weak_self| Self {
            leader_key: config.leader_key(),
            leader_left: config.leader_left_channel(),
            leader_changed: config.leader_changed_channel(),
            shutdown_channel: config.shutdown_channel(),
            ctx,
            transport,
            config,
            inner: Mutex::new(Inner {
                state: ElectionState::Unclaimed,
                peer_id: None,
                settle: None,
                started: false,
                relinquishing: false,
            }),
            weak_self: weak_self.clone(),
        }))
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// This peer's id, once `start()` has run.
    pub fn peer_id(&self) -> Option<PeerId> {
        self.lock().peer_id.clone()
    }

    pub fn state(&self) -> ElectionState {
        self.lock().state
    }

    /// Join the election. Calling it again is a no-op.
    ///
    /// Fails if either store is unusable; nothing is retried.
    pub fn start(&self) -> Result<()> {
        if self.lock().started {
            return Ok(());
        }

        self.ctx.store.probe()?;
        self.ctx.identity.probe()?;

        self.check_obsolete()?;

        let peer_id = PeerId::load_or_create(&*self.ctx.identity, &self.config.peer_id_key())?;
        let state = match self.leadership_record()? {
            Some(record) if record.peer_id == peer_id => ElectionState::Leader,
            Some(_) => ElectionState::Follower,
            None => ElectionState::Unclaimed,
        };

        {
            let mut inner = self.lock();
            inner.peer_id = Some(peer_id.clone());
            inner.state = state;
            inner.started = true;
        }

        let weak = self.weak_self.clone();
        self.ctx.shutdown.register(Box::new(move || {
            if let Some(election) = weak.upgrade() {
                election.on_shutdown();
            }
        }));

        let weak = self.weak_self.clone();
        self.transport.subscribe(&self.leader_left, move |_| {
            if let Some(election) = weak.upgrade() {
                election.on_leader_left();
            }
        });

        let weak = self.weak_self.clone();
        self.transport.subscribe(&self.shutdown_channel, move |_| {
            if let Some(election) = weak.upgrade() {
                election.halt();
            }
        });

        info!("Peer {} joined election {} as {:?}", peer_id, self.config.namespace, state);
        Ok(())
    }

    /// Contend for leadership.
    ///
    /// With an empty slot this writes a claim and returns a provisional
    /// `false`; the settled outcome is published to `subscribe` callbacks.
    /// With an occupied slot the answer is immediate.
    pub fn try_claim(&self) -> Result<bool> {
        let (peer_id, state) = {
            let inner = self.lock();
            (inner.peer_id.clone(), inner.state)
        };
        let peer_id = peer_id.ok_or(ElectionError::NotStarted)?;
        if state == ElectionState::Stopped {
            debug!("Election stopped, not claiming");
            return Ok(false);
        }

        match self.leadership_record()? {
            None => {
                let record = LeadershipRecord::new(peer_id.clone(), self.ctx.now_millis());
                self.ctx.store.set(&self.leader_key, &record.encode()?)?;

                let delay = self
                    .ctx
                    .random
                    .duration_between(self.config.settle_delay_min, self.config.settle_delay_max);
                let weak = self.weak_self.clone();
                let handle = self.ctx.scheduler.schedule(
                    delay,
                    Box::new(move || {
                        if let Some(election) = weak.upgrade() {
                            election.settle();
                        }
                    }),
                );

                {
                    let mut inner = self.lock();
                    if let Some(previous) = inner.settle.replace(handle) {
                        previous.cancel();
                    }
                    inner.state = ElectionState::SettlingClaim;
                }

                debug!("Peer {} claimed leadership, settling for {:?}", peer_id, delay);
                Ok(false)
            }
            Some(record) if record.peer_id == peer_id => {
                self.transition(ElectionState::Leader);
                Ok(true)
            }
            Some(record) => {
                debug!("Leadership held by {}", record.peer_id);
                self.transition(ElectionState::Follower);
                Ok(false)
            }
        }
    }

    /// Alias of `try_claim`.
    pub fn try_master(&self) -> Result<bool> {
        self.try_claim()
    }

    /// Claim the slot if the store shows it empty, whatever this peer last saw.
    ///
    /// Covers a leader-left announcement that was overwritten before this
    /// peer read it. Returns whether a claim was written.
    pub fn contend_if_vacant(&self) -> Result<bool> {
        let state = {
            let inner = self.lock();
            if inner.peer_id.is_none() {
                return Err(ElectionError::NotStarted);
            }
            inner.state
        };
        if matches!(state, ElectionState::Stopped | ElectionState::SettlingClaim) {
            return Ok(false);
        }
        if self.leadership_record()?.is_some() {
            return Ok(false);
        }

        debug!("Leadership slot is empty, contending");
        self.try_claim()?;
        Ok(true)
    }

    /// Whether the stored record names this peer. Never writes.
    pub fn is_leader(&self) -> Result<bool> {
        let Some(peer_id) = self.peer_id() else {
            return Ok(false);
        };
        Ok(self
            .leadership_record()?
            .is_some_and(|record| record.peer_id == peer_id))
    }

    /// Alias of `is_leader`.
    pub fn is_master(&self) -> Result<bool> {
        self.is_leader()
    }

    /// Current record, with anything unparseable read as absent.
    pub fn leadership_record(&self) -> Result<Option<LeadershipRecord>> {
        Ok(self
            .ctx
            .store
            .get(&self.leader_key)?
            .and_then(|raw| LeadershipRecord::parse(&raw)))
    }

    /// Empty the slot and tell every other peer to contend.
    ///
    /// Used by a departing leader and for an explicit reset. This peer does
    /// not contend in response to its own announcement.
    pub fn relinquish(&self) -> Result<()> {
        // Local state is left alone until the record is really gone.
        self.ctx.store.remove(&self.leader_key)?;

        {
            let mut inner = self.lock();
            inner.relinquishing = true;
            if let Some(settle) = inner.settle.take() {
                settle.cancel();
            }
            if inner.state != ElectionState::Stopped {
                inner.state = ElectionState::Unclaimed;
            }
        }

        let result = self.transport.dispatch_global(&self.leader_left, ".");
        self.lock().relinquishing = false;
        result?;

        info!("Leadership relinquished");
        Ok(())
    }

    /// Alias of `relinquish`.
    pub fn stop(&self) -> Result<()> {
        self.relinquish()
    }

    /// Drop the record if it is older than `obsolete_after`.
    ///
    /// Returns whether a record was dropped.
    pub fn check_obsolete(&self) -> Result<bool> {
        let Some(record) = self.leadership_record()? else {
            return Ok(false);
        };

        let age = record.age_millis(self.ctx.now_millis());
        if age <= self.config.obsolete_after.as_millis() as u64 {
            return Ok(false);
        }

        warn!("Leader {} is obsolete ({} ms old), dropping it", record.peer_id, age);
        self.vacate()?;
        Ok(true)
    }

    /// Halt the election on every peer. Nobody leads until peers restart.
    pub fn stop_all(&self) -> Result<()> {
        self.transport.dispatch_global(&self.shutdown_channel, ".")?;
        self.ctx.store.remove(&self.leader_key)?;
        info!("Election {} stopped on all peers", self.config.namespace);
        Ok(())
    }

    /// Receive this peer's leadership flag whenever a claim settles.
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.transport
            .subscribe(&self.leader_changed, move |payload: &Value| {
                if let Some(is_leader) = payload.as_bool() {
                    callback(is_leader);
                }
            });
    }

    /// Drop every leadership callback. Returns how many were removed.
    pub fn unsubscribe(&self) -> usize {
        self.transport.unsubscribe(&self.leader_changed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn vacate(&self) -> Result<()> {
        self.ctx.store.remove(&self.leader_key)?;
        self.transport.dispatch_global(&self.leader_left, ".")?;
        Ok(())
    }

    fn transition(&self, next: ElectionState) {
        let previous = {
            let mut inner = self.lock();
            if inner.state == ElectionState::Stopped {
                return;
            }
            std::mem::replace(&mut inner.state, next)
        };

        if previous != next {
            match next {
                ElectionState::Leader => info!("This peer is now the leader"),
                ElectionState::Follower => info!("This peer is now a follower"),
                _ => debug!("Election state {:?} -> {:?}", previous, next),
            }
        }
    }

    fn settle(&self) {
        let peer_id = {
            let mut inner = self.lock();
            inner.settle = None;
            if inner.state == ElectionState::Stopped {
                return;
            }
            inner.peer_id.clone()
        };

        let record = match self.leadership_record() {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to read leadership after settling: {}", e);
                None
            }
        };

        let (next, is_leader) = match record {
            Some(record) if Some(&record.peer_id) == peer_id.as_ref() => {
                (ElectionState::Leader, true)
            }
            Some(_) => (ElectionState::Follower, false),
            None => (ElectionState::Unclaimed, false),
        };

        self.transition(next);
        self.transport
            .dispatch_local(&self.leader_changed, &Value::Bool(is_leader));
    }

    fn on_leader_left(&self) {
        {
            let inner = self.lock();
            if inner.relinquishing {
                debug!("Ignoring own leader-left announcement");
                return;
            }
            if inner.state == ElectionState::Stopped {
                return;
            }
        }

        debug!("Leader left, contending");
        if let Err(e) = self.try_claim() {
            warn!("Failed to contend for leadership: {}", e);
        }
    }

    /// Stop taking part locally: no more contending, no pending settle.
    fn halt(&self) {
        {
            let mut inner = self.lock();
            if inner.state == ElectionState::Stopped {
                return;
            }
            inner.state = ElectionState::Stopped;
            if let Some(settle) = inner.settle.take() {
                settle.cancel();
            }
        }

        self.transport.unsubscribe(&self.leader_left);
        info!("Election halted on this peer");
    }

    fn on_shutdown(&self) {
        match self.is_leader() {
            Ok(true) => {
                if let Err(e) = self.relinquish() {
                    warn!("Failed to relinquish leadership on shutdown: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Failed to read leadership on shutdown: {}", e),
        }
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use crate::identity::IdentityStore;
    use super::*;
    use crate::clock::ManualClock;
    use crate::context::TestPeer;
    use crate::store::{HubOptions, MemoryHub, SharedStore};
    use std::time::Duration;

    const SETTLE: Duration = Duration::from_millis(100);

    fn peer(hub: &MemoryHub, clock: &Arc<ManualClock>, seed: u64) -> (TestPeer, Arc<LeaderElection>) {
        let peer = TestPeer::new(Arc::new(hub.connect()), Arc::clone(clock), seed);
        let transport = BroadcastTransport::connect(peer.ctx.clone()).unwrap();
        let election =
            LeaderElection::new(peer.ctx.clone(), transport, ElectionConfig::default()).unwrap();
        (peer, election)
    }

    #[test]
    fn test_try_claim_before_start() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (_peer, election) = peer(&hub, &clock, 1);

        assert!(matches!(election.try_claim(), Err(ElectionError::NotStarted)));
        assert!(!election.is_leader().unwrap());
    }

    #[test]
    fn test_start_is_idempotent() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (peer, election) = peer(&hub, &clock, 1);

        election.start().unwrap();
        let id = election.peer_id().unwrap();
        election.start().unwrap();

        assert_eq!(election.peer_id().unwrap(), id);
        assert_eq!(
            peer.identity.get("master_tab_id").unwrap().as_deref(),
            Some(id.as_str())
        );
    }

    #[test]
    fn test_start_fails_on_unavailable_store() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (_peer, election) = peer(&hub, &clock, 1);
        hub.set_available(false);

        assert!(matches!(
            election.start(),
            Err(ElectionError::Store(StoreError::Unavailable(_)))
        ));
        assert!(election.peer_id().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let peer = TestPeer::new(Arc::new(hub.connect()), clock, 1);
        let transport = BroadcastTransport::connect(peer.ctx.clone()).unwrap();

        let result = LeaderElection::new(peer.ctx.clone(), transport, ElectionConfig::with_namespace(""));
        assert!(matches!(result, Err(ElectionError::Config(ConfigError::EmptyNamespace))));
    }

    #[test]
    fn test_claim_settles_to_leader() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();

        assert!(!election.try_claim().unwrap());
        assert_eq!(election.state(), ElectionState::SettlingClaim);
        // The claim is already visible before it settles.
        assert!(election.is_leader().unwrap());

        peer.scheduler.advance(SETTLE);
        assert_eq!(election.state(), ElectionState::Leader);
        assert!(election.try_claim().unwrap());
    }

    #[test]
    fn test_settle_publishes_result() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        election.subscribe(move |is_leader| seen_clone.lock().unwrap().push(is_leader));

        election.try_claim().unwrap();
        assert!(seen.lock().unwrap().is_empty());
        peer.scheduler.advance(SETTLE);
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_overwritten_claim_settles_to_follower() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        election.subscribe(move |is_leader| seen_clone.lock().unwrap().push(is_leader));

        election.try_claim().unwrap();
        let rival = LeadershipRecord::new("rival".parse().unwrap(), 1_000);
        hub.connect()
            .set("master_tab_master_id", &rival.encode().unwrap())
            .unwrap();

        peer.scheduler.advance(SETTLE);
        assert_eq!(election.state(), ElectionState::Follower);
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[test]
    fn test_claim_removed_before_settle() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();

        election.try_claim().unwrap();
        hub.connect().remove("master_tab_master_id").unwrap();

        peer.scheduler.advance(SETTLE);
        assert_eq!(election.state(), ElectionState::Unclaimed);
    }

    #[test]
    fn test_reentering_claim_replaces_timer() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        election.subscribe(move |is_leader| seen_clone.lock().unwrap().push(is_leader));

        election.try_claim().unwrap();
        hub.connect().remove("master_tab_master_id").unwrap();
        election.try_claim().unwrap();
        assert_eq!(peer.scheduler.pending(), 1);

        peer.scheduler.advance(SETTLE);
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_malformed_record_is_unclaimed() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (peer, election) = peer(&hub, &clock, 1);
        hub.connect().set("master_tab_master_id", "garbage").unwrap();
        election.start().unwrap();

        assert!(!election.is_leader().unwrap());
        assert!(!election.try_claim().unwrap());
        peer.scheduler.advance(SETTLE);
        assert!(election.is_leader().unwrap());
    }

    #[test]
    fn test_claim_write_failure_propagates() {
        let hub = MemoryHub::with_options(HubOptions {
            max_value_bytes: Some(20),
            ..Default::default()
        });
        let clock = Arc::new(ManualClock::new(1_000));
        let (peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();

        assert!(matches!(
            election.try_claim(),
            Err(ElectionError::Store(StoreError::QuotaExceeded { .. }))
        ));
        assert_eq!(peer.scheduler.pending(), 0);
        assert_eq!(election.state(), ElectionState::Unclaimed);
    }

    /// Identity store that cannot be used at all.
    struct BrokenIdentity;

    impl crate::identity::IdentityStore for BrokenIdentity {
        fn probe(&self) -> std::result::Result<(), IdentityError> {
            Err(IdentityError::Unavailable("storage disabled".into()))
        }

        fn get(&self, _key: &str) -> std::result::Result<Option<String>, IdentityError> {
            Err(IdentityError::Unavailable("storage disabled".into()))
        }

        fn set(&self, _key: &str, _value: &str) -> std::result::Result<(), IdentityError> {
            Err(IdentityError::Unavailable("storage disabled".into()))
        }
    }

    #[test]
    fn test_start_fails_on_unavailable_identity() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let peer = TestPeer::new(Arc::new(hub.connect()), clock, 1);
        let mut ctx = peer.ctx.clone();
        ctx.identity = Arc::new(BrokenIdentity);
        let transport = BroadcastTransport::connect(ctx.clone()).unwrap();
        let election = LeaderElection::new(ctx, transport, ElectionConfig::default()).unwrap();

        assert!(matches!(
            election.start(),
            Err(ElectionError::Identity(IdentityError::Unavailable(_)))
        ));
        assert!(election.peer_id().is_none());
        assert!(matches!(election.try_claim(), Err(ElectionError::NotStarted)));
        assert!(hub.get("master_tab_master_id").is_none());
    }

    #[test]
    fn test_failed_relinquish_keeps_leadership() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();
        election.try_claim().unwrap();
        peer.scheduler.advance(SETTLE);
        assert_eq!(election.state(), ElectionState::Leader);

        hub.set_available(false);
        assert!(matches!(
            election.relinquish(),
            Err(ElectionError::Store(StoreError::Unavailable(_)))
        ));
        assert_eq!(election.state(), ElectionState::Leader);

        hub.set_available(true);
        assert!(election.is_leader().unwrap());
        assert!(election.try_claim().unwrap());
    }

    #[test]
    fn test_failed_relinquish_keeps_pending_settle() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();
        election.try_claim().unwrap();

        hub.set_available(false);
        assert!(election.relinquish().is_err());
        assert_eq!(election.state(), ElectionState::SettlingClaim);

        hub.set_available(true);
        peer.scheduler.advance(SETTLE);
        assert_eq!(election.state(), ElectionState::Leader);
    }

    #[test]
    fn test_contend_if_vacant_after_missed_announcement() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (leader_env, leader) = peer(&hub, &clock, 1);
        let (follower_env, follower) = peer(&hub, &clock, 2);

        leader.start().unwrap();
        leader.try_claim().unwrap();
        leader_env.scheduler.advance(SETTLE);
        follower.start().unwrap();
        assert!(!follower.try_claim().unwrap());
        assert_eq!(follower.state(), ElectionState::Follower);

        // The record vanishes without any announcement reaching the follower.
        hub.connect().remove("master_tab_master_id").unwrap();
        assert_eq!(follower.state(), ElectionState::Follower);

        assert!(follower.contend_if_vacant().unwrap());
        assert_eq!(follower.state(), ElectionState::SettlingClaim);
        follower_env.scheduler.advance(SETTLE);
        assert_eq!(follower.state(), ElectionState::Leader);
    }

    #[test]
    fn test_contend_if_vacant_leaves_held_slot() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (leader_env, leader) = peer(&hub, &clock, 1);
        let (follower_env, follower) = peer(&hub, &clock, 2);

        assert!(matches!(follower.contend_if_vacant(), Err(ElectionError::NotStarted)));

        leader.start().unwrap();
        leader.try_claim().unwrap();
        leader_env.scheduler.advance(SETTLE);
        follower.start().unwrap();

        assert!(!follower.contend_if_vacant().unwrap());
        assert!(!leader.contend_if_vacant().unwrap());
        assert_eq!(follower_env.scheduler.pending(), 0);
        assert!(leader.is_leader().unwrap());
    }

    #[test]
    fn test_relinquish_does_not_reclaim() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();
        election.try_claim().unwrap();
        peer.scheduler.advance(SETTLE);

        election.relinquish().unwrap();

        assert!(hub.get("master_tab_master_id").is_none());
        assert_eq!(election.state(), ElectionState::Unclaimed);
        assert_eq!(peer.scheduler.pending(), 0);
    }

    #[test]
    fn test_start_drops_obsolete_record() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(10_000_000));
        let old = LeadershipRecord::new("ghost".parse().unwrap(), 1_000);
        hub.connect()
            .set("master_tab_master_id", &old.encode().unwrap())
            .unwrap();

        let (_peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();

        assert!(hub.get("master_tab_master_id").is_none());
        assert_eq!(election.state(), ElectionState::Unclaimed);
    }

    #[test]
    fn test_recent_record_survives_check() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(10_000_000));
        let fresh = LeadershipRecord::new("alive".parse().unwrap(), 9_000_000);
        hub.connect()
            .set("master_tab_master_id", &fresh.encode().unwrap())
            .unwrap();

        let (_peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();

        assert!(!election.check_obsolete().unwrap());
        assert_eq!(election.state(), ElectionState::Follower);
        assert!(!election.try_claim().unwrap());
    }

    #[test]
    fn test_shutdown_hook_relinquishes_leader() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();
        election.try_claim().unwrap();
        peer.scheduler.advance(SETTLE);

        peer.shutdown.trigger();

        assert!(hub.get("master_tab_master_id").is_none());
        assert_eq!(election.state(), ElectionState::Stopped);
        assert!(!election.try_claim().unwrap());
    }

    #[test]
    fn test_shutdown_hook_leaves_foreign_record() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let other = LeadershipRecord::new("other".parse().unwrap(), 1_000);
        hub.connect()
            .set("master_tab_master_id", &other.encode().unwrap())
            .unwrap();

        let (peer, election) = peer(&hub, &clock, 1);
        election.start().unwrap();
        peer.shutdown.trigger();

        assert!(hub.get("master_tab_master_id").is_some());
    }

    #[test]
    fn test_unsubscribe_leadership_callbacks() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (_peer, election) = peer(&hub, &clock, 1);

        election.subscribe(|_| {});
        election.subscribe(|_| {});
        assert_eq!(election.unsubscribe(), 2);
    }
}
