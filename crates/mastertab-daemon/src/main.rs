//! mastertab: leader election between processes sharing a store directory.
//!
//! Every process started with `run` on the same `--store` joins one election;
//! exactly one of them leads at a time. The other commands act on the shared
//! store from the outside.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use mastertab_core::{
    BroadcastTransport, Clock, Context, ElectionConfig, IdentityStore, LeaderElection,
    ManualShutdown, MemoryIdentityStore, SystemClock,
};
use mastertab_daemon::{FileIdentityStore, FileStore, FileStoreOptions, TokioScheduler};

#[derive(Parser, Debug)]
#[command(name = "mastertab")]
#[command(about = "Leader election over a shared store directory")]
struct Args {
    /// Path to the shared store directory
    #[arg(short, long)]
    store: PathBuf,

    /// Prefix for every key and channel of this election
    #[arg(short, long, default_value = "master_tab")]
    namespace: String,

    /// Age in seconds after which a leader record is considered abandoned
    #[arg(long, default_value_t = 60 * 60)]
    obsolete_after_secs: u64,

    /// Lower bound of the settle delay in milliseconds
    #[arg(long, default_value_t = 50)]
    settle_min_ms: u64,

    /// Upper bound of the settle delay in milliseconds
    #[arg(long, default_value_t = 250)]
    settle_max_ms: u64,

    /// File keeping this peer's id across restarts (fresh id per run if omitted)
    #[arg(long)]
    identity_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join the election and stay until ctrl-c (default)
    ///
    /// Claims are never refreshed, so every peer's periodic check drops a
    /// leader, healthy or not, once its record is older than
    /// `--obsolete-after-secs`, and the peers elect again.
    Run {
        /// Seconds between checks for an abandoned leader
        #[arg(long, default_value_t = 60)]
        check_interval_secs: u64,
    },
    /// Print the current leadership record
    Status,
    /// Drop the current leader and make every peer contend again
    Reset,
    /// Stop the election on every running peer
    Halt,
    /// Broadcast a JSON payload on a channel to every peer
    Send {
        channel: String,
        /// JSON payload; anything that does not parse is sent as a string
        payload: String,
    },
}

impl Args {
    fn election_config(&self) -> ElectionConfig {
        ElectionConfig {
            namespace: self.namespace.clone(),
            obsolete_after: Duration::from_secs(self.obsolete_after_secs),
            settle_delay_min: Duration::from_millis(self.settle_min_ms),
            settle_delay_max: Duration::from_millis(self.settle_max_ms),
        }
    }
}

/// Everything one peer needs, wired to the store directory.
struct Peer {
    shutdown: Arc<ManualShutdown>,
    transport: Arc<BroadcastTransport>,
    election: Arc<LeaderElection>,
}

impl Peer {
    fn open(args: &Args) -> Result<Self> {
        let store = FileStore::open(&args.store, FileStoreOptions::default())
            .with_context(|| format!("Failed to open store {:?}", args.store))?;
        let identity: Arc<dyn IdentityStore> = match &args.identity_file {
            Some(path) => Arc::new(FileIdentityStore::new(path)),
            None => Arc::new(MemoryIdentityStore::new()),
        };
        let shutdown = Arc::new(ManualShutdown::new());

        let ctx = Context::new(
            Arc::new(store),
            identity,
            Arc::new(TokioScheduler::current()),
            shutdown.clone(),
        );
        let transport = BroadcastTransport::connect(ctx.clone())?;
        let election = LeaderElection::new(ctx, Arc::clone(&transport), args.election_config())?;

        Ok(Self {
            shutdown,
            transport,
            election,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,mastertab_core=debug,mastertab_daemon=debug"
    } else {
        "info,mastertab_core=info,mastertab_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let peer = Peer::open(&args)?;

    match args.command {
        None => run(peer, Duration::from_secs(60)).await,
        Some(Command::Run {
            check_interval_secs,
        }) => run(peer, Duration::from_secs(check_interval_secs.max(1))).await,
        Some(Command::Status) => status(&peer),
        Some(Command::Reset) => {
            peer.election.relinquish()?;
            println!("Leadership reset");
            Ok(())
        }
        Some(Command::Halt) => {
            peer.election.stop_all()?;
            println!("Election halted on all peers");
            Ok(())
        }
        Some(Command::Send { channel, payload }) => {
            let payload: Value =
                serde_json::from_str(&payload).unwrap_or_else(|_| Value::String(payload));
            peer.transport.dispatch_global(&channel, &payload)?;
            Ok(())
        }
    }
}

fn status(peer: &Peer) -> Result<()> {
    match peer.election.leadership_record()? {
        Some(record) => {
            let now = SystemClock.now_millis();
            println!(
                "Leader: {} (claimed {}s ago)",
                record.peer_id,
                record.age_millis(now) / 1000
            );
        }
        None => println!("unclaimed"),
    }
    Ok(())
}

async fn run(peer: Peer, check_interval: Duration) -> Result<()> {
    info!("Starting mastertab");

    peer.election.subscribe(|is_leader| {
        if is_leader {
            info!("Leadership settled: this peer leads");
        } else {
            info!("Leadership settled: another peer leads");
        }
    });

    let halted = Arc::new(Notify::new());
    let halted_clone = Arc::clone(&halted);
    let shutdown_channel = peer.election.config().shutdown_channel();
    peer.transport.subscribe(&shutdown_channel, move |_| {
        halted_clone.notify_one();
    });

    peer.election.start()?;
    if let Some(peer_id) = peer.election.peer_id() {
        info!("Peer ID: {}", peer_id);
    }
    peer.election.try_claim()?;

    info!("Daemon running. Press Ctrl+C to stop.");

    let mut check = tokio::time::interval(check_interval);
    // The first tick completes immediately.
    check.tick().await;

    loop {
        tokio::select! {
            _ = check.tick() => {
                match peer.election.check_obsolete() {
                    Ok(true) => info!("Dropped an abandoned leader"),
                    Ok(false) => {}
                    Err(e) => warn!("Failed to check leader age: {}", e),
                }
                // Contend again if a leader-left announcement was missed.
                match peer.election.contend_if_vacant() {
                    Ok(true) => debug!("Found the leadership slot empty, contending"),
                    Ok(false) => {}
                    Err(e) => warn!("Failed to contend for leadership: {}", e),
                }
            }

            _ = halted.notified() => {
                info!("Election halted by another peer");
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    let ran = peer.shutdown.trigger();
    debug!("Ran {} shutdown callback(s)", ran);
    info!("Shutting down");
    Ok(())
}
