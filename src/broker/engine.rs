//! Broker engine
//!
//! This module owns all queue state and supervises the three concurrent
//! units that touch it:
//! - the inbound receiver, which decodes messages into the intake queue
//! - the dispatch loop, which routes intake messages into per-destination
//!   outbound queues on a fixed tick
//! - the fetch server, which pops the oldest message of one destination
//!
//! Concurrency and usage notes:
//! - State lives in a single `BrokerState` shared through an `Arc`; nothing
//!   is global. The receiver only pushes to the intake queue, the dispatch
//!   loop is the only code that creates outbound entries, and the fetch
//!   server only pops from existing entries.
//! - The table lock is held for lookup/creation only. Pushes and pops go
//!   through the per-destination queue's own lock.
//! - State is memory-only. Stopping the process loses every queued message.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::broker::message::Message;
use crate::broker::queue::MessageQueue;
use crate::config::Settings;
use crate::transport::{FetchServer, InboundReceiver, ListenerOptions};
use crate::utils::Result;

/// Destination address -> outbound queue. Entries are never removed.
#[derive(Debug, Default)]
pub struct OutboundTable {
    queues: Mutex<HashMap<String, Arc<MessageQueue>>>,
}

impl OutboundTable {
    pub fn get(&self, dest: &str) -> Option<Arc<MessageQueue>> {
        self.lock().get(dest).cloned()
    }

    pub(crate) fn get_or_create(&self, dest: &str) -> Arc<MessageQueue> {
        self.lock()
            .entry(dest.to_string())
            .or_insert_with(|| Arc::new(MessageQueue::new()))
            .clone()
    }

    /// Pop the head of `dest`'s queue. Unknown destinations and drained
    /// queues both give `None`.
    pub fn pop(&self, dest: &str) -> Option<Message> {
        self.get(dest)?.pop()
    }

    pub fn depth(&self, dest: &str) -> usize {
        self.get(dest).map_or(0, |queue| queue.len())
    }

    pub fn destinations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn purge_expired(&self, ttl: Duration, now: Instant) -> usize {
        let queues: Vec<Arc<MessageQueue>> = self.lock().values().cloned().collect();
        queues
            .iter()
            .map(|queue| queue.purge_older_than(ttl, now))
            .sum()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<MessageQueue>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The intake queue and the outbound table, owned by one broker.
#[derive(Debug, Default)]
pub struct BrokerState {
    pub(crate) intake: MessageQueue,
    pub(crate) outbound: OutboundTable,
}

impl BrokerState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Drain the intake queue into the outbound table. Returns the number of
/// messages routed.
pub(crate) fn dispatch_once(state: &BrokerState) -> usize {
    let mut routed = 0;
    while let Some(msg) = state.intake.pop() {
        let queue = state.outbound.get_or_create(msg.dest());
        debug!("Enqueued outgoing msg for {}", msg.dest());
        queue.push(msg);
        routed += 1;
    }
    routed
}

pub(crate) async fn run_dispatch_loop(
    state: Arc<BrokerState>,
    interval: Duration,
    ttl: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let routed = dispatch_once(&state);
        if routed > 0 {
            info!("Dispatched {routed} message(s)");
        }

        if let Some(ttl) = ttl {
            let expired = state.outbound.purge_expired(ttl, Instant::now());
            if expired > 0 {
                warn!("Expired {expired} message(s) older than {}s", ttl.as_secs());
            }
        }
    }

    info!("Dispatch loop stopped");
}

/// The message broker. Build it from settings, then `start` it.
#[derive(Debug)]
pub struct Broker {
    settings: Settings,
    state: Arc<BrokerState>,
}

impl Broker {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            state: Arc::new(BrokerState::new()),
        }
    }

    /// Bind both listeners and spawn the receiver, fetch server and
    /// dispatch loop. Port `0` binds an ephemeral port; the handle reports
    /// the real addresses.
    pub async fn start(self) -> Result<BrokerHandle> {
        self.settings.validate()?;

        let send_listener = TcpListener::bind(self.settings.send_addr()).await?;
        let fetch_listener = TcpListener::bind(self.settings.fetch_addr()).await?;
        let send_addr = send_listener.local_addr()?;
        let fetch_addr = fetch_listener.local_addr()?;

        let options = ListenerOptions::from(&self.settings.broker);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let receiver = InboundReceiver::new(send_listener, self.state.clone(), options.clone());
        let fetcher = FetchServer::new(fetch_listener, self.state.clone(), options);

        let tasks = vec![
            tokio::spawn(receiver.run(shutdown_rx.clone())),
            tokio::spawn(fetcher.run(shutdown_rx.clone())),
            tokio::spawn(run_dispatch_loop(
                self.state.clone(),
                self.settings.broker.dispatch_interval(),
                self.settings.broker.message_ttl(),
                shutdown_rx,
            )),
        ];

        info!("Broker started: send on {send_addr}, fetch on {fetch_addr}");

        Ok(BrokerHandle {
            send_addr,
            fetch_addr,
            stats: BrokerStats {
                state: self.state,
            },
            shutdown_tx,
            tasks,
        })
    }
}

/// Read-only view of a running broker's queues.
#[derive(Debug, Clone)]
pub struct BrokerStats {
    state: Arc<BrokerState>,
}

impl BrokerStats {
    /// Messages received but not yet dispatched.
    pub fn intake_len(&self) -> usize {
        self.state.intake.len()
    }

    pub fn queue_depth(&self, dest: &str) -> usize {
        self.state.outbound.depth(dest)
    }

    pub fn destinations(&self) -> Vec<String> {
        self.state.outbound.destinations()
    }
}

/// Handle to a running broker.
#[derive(Debug)]
pub struct BrokerHandle {
    send_addr: SocketAddr,
    fetch_addr: SocketAddr,
    stats: BrokerStats,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl BrokerHandle {
    pub fn send_addr(&self) -> SocketAddr {
        self.send_addr
    }

    pub fn fetch_addr(&self) -> SocketAddr {
        self.fetch_addr
    }

    pub fn stats(&self) -> BrokerStats {
        self.stats.clone()
    }

    pub fn intake_len(&self) -> usize {
        self.stats.intake_len()
    }

    pub fn queue_depth(&self, dest: &str) -> usize {
        self.stats.queue_depth(dest)
    }

    pub fn destinations(&self) -> Vec<String> {
        self.stats.destinations()
    }

    /// Stop both listeners and the dispatch loop, then wait for them.
    /// The listening sockets are closed when this returns.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Broker task ended abnormally: {e}");
            }
        }
        info!("Broker closed.");
    }

    /// Run until Ctrl-C, then shut down.
    pub async fn run_until_shutdown(self) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received. Exiting gracefully.");
        self.shutdown().await;
        Ok(())
    }
}
