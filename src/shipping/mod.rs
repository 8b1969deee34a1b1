//! Log shipping: one task per follower replicates the leader's log.

mod command;
mod shipper;


use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing_futures::Instrument;

pub use self::command::ShipCommand;
pub(crate) use self::shipper::RaftLogShipper;
pub(crate) use self::shipper::ShipperEvent;
use crate::config::Config;
use crate::entry::AppData;
use crate::log::RaftLog;
use crate::log::SharedInFlightCache;
use crate::network::Outbound;
use crate::state::StorageError;
use crate::LogIndex;
use crate::MemberId;
use crate::Term;

/// What every shipper needs to know about the leader it ships for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderContext {
    pub term: Term,
    pub commit_index: LogIndex,
}

/// How a shipper currently replicates to its follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipperMode {
    /// Probing for the last entry both logs agree on.
    Mismatch,

    /// Sending batches, one at a time, until the follower has caught up.
    Catchup,

    /// Forwarding new entries as they are appended.
    Pipeline,
}

/// The status a shipper reports to the raft task whenever it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub target: MemberId,
    pub leader_term: Term,
    pub mode: ShipperMode,
    pub match_index: LogIndex,
    pub last_sent_index: LogIndex,

    /// Catching up made no progress within `catchup_timeout`.
    pub degraded: bool,
}

/// What a shipper tells the raft task.
#[derive(Debug, Clone)]
pub(crate) enum ShipperReport {
    /// The replication status of the follower changed.
    Status(ReplicationStatus),

    /// Reading the log failed and the shipper stopped.
    Failed {
        target: MemberId,
        leader_term: Term,
        error: StorageError,
    },
}

struct ShipperHandle<D: AppData> {
    tx: mpsc::UnboundedSender<(ShipperEvent<D>, LeaderContext)>,
    handle: JoinHandle<()>,
}

/// Starts, feeds and stops the shippers of a leader.
pub(crate) struct RaftLogShippingManager<D, L>
where
    D: AppData,
    L: RaftLog<D>,
{
    me: MemberId,
    config: Arc<Config>,
    outbound: Arc<dyn Outbound<D>>,
    log: Arc<RwLock<L>>,
    cache: SharedInFlightCache<D>,
    tx_status: mpsc::UnboundedSender<ShipperReport>,

    /// `Some` while running, i.e. while this member is leader.
    context: Option<LeaderContext>,
    shippers: BTreeMap<MemberId, ShipperHandle<D>>,
}

impl<D, L> RaftLogShippingManager<D, L>
where
    D: AppData,
    L: RaftLog<D> + 'static,
{
    pub(crate) fn new(
        me: MemberId,
        config: Arc<Config>,
        outbound: Arc<dyn Outbound<D>>,
        log: Arc<RwLock<L>>,
        cache: SharedInFlightCache<D>,
        tx_status: mpsc::UnboundedSender<ShipperReport>,
    ) -> Self {
        Self {
            me,
            config,
            outbound,
            log,
            cache,
            tx_status,
            context: None,
            shippers: BTreeMap::new(),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.context.is_some()
    }

    pub(crate) fn targets(&self) -> BTreeSet<MemberId> {
        self.shippers.keys().copied().collect()
    }

    /// Start shipping to every member of `targets` but this one.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) fn start(&mut self, context: LeaderContext, targets: &BTreeSet<MemberId>) {
        self.stop();
        self.context = Some(context);
        self.set_targets(targets);
    }

    /// Stop every shipper.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) fn stop(&mut self) {
        self.context = None;
        let shippers = std::mem::take(&mut self.shippers);
        for (target, h) in shippers {
            Self::stop_shipper(target, h);
        }
    }

    /// Ship to exactly `targets`, excluding this member. Only while running.
    pub(crate) fn set_targets(&mut self, targets: &BTreeSet<MemberId>) {
        let context = match self.context {
            Some(x) => x,
            None => return,
        };

        let removed = self.shippers.keys().filter(|x| !targets.contains(x)).copied().collect::<Vec<_>>();
        for target in removed {
            if let Some(h) = self.shippers.remove(&target) {
                Self::stop_shipper(target, h);
            }
        }

        for target in targets.iter().filter(|x| **x != self.me) {
            if !self.shippers.contains_key(target) {
                let h = self.spawn_shipper(*target, context);
                self.shippers.insert(*target, h);
            }
        }
    }

    /// Route the ship commands of an outcome to the shippers.
    pub(crate) fn handle_commands(&mut self, context: LeaderContext, commands: &[ShipCommand<D>]) {
        if self.context.is_none() {
            return;
        }
        self.context = Some(context);

        for cmd in commands {
            match cmd {
                ShipCommand::Mismatch {
                    target,
                    last_remote_append_index,
                } => self.send_to(*target, context, ShipperEvent::Mismatch {
                    last_remote_append_index: *last_remote_append_index,
                }),
                ShipCommand::Match { target, new_match_index } => self.send_to(*target, context, ShipperEvent::Match {
                    new_match_index: *new_match_index,
                }),
                ShipCommand::NewEntries {
                    prev_log_index,
                    prev_log_term,
                    entries,
                } => self.broadcast(context, ShipperEvent::NewEntries {
                    prev_log_index: *prev_log_index,
                    prev_log_term: *prev_log_term,
                    entries: entries.clone(),
                }),
                ShipCommand::CommitUpdate => self.broadcast(context, ShipperEvent::CommitUpdate),
            }
        }
    }

    fn send_to(&self, target: MemberId, context: LeaderContext, ev: ShipperEvent<D>) {
        match self.shippers.get(&target) {
            Some(h) => {
                let _ = h.tx.send((ev, context));
            }
            None => {
                tracing::debug!(id = self.me, target, "no shipper for target");
            }
        }
    }

    fn broadcast(&self, context: LeaderContext, ev: ShipperEvent<D>) {
        for h in self.shippers.values() {
            let _ = h.tx.send((ev.clone(), context));
        }
    }

    fn spawn_shipper(&self, target: MemberId, context: LeaderContext) -> ShipperHandle<D> {
        tracing::info!(id = self.me, target, term = context.term, "start log shipper");

        let (tx, rx) = mpsc::unbounded_channel();
        let shipper = RaftLogShipper::new(
            self.me,
            target,
            context,
            self.config.clone(),
            self.outbound.clone(),
            self.log.clone(),
            self.cache.clone(),
            rx,
            self.tx_status.clone(),
        );

        let handle = tokio::spawn(shipper.main().instrument(tracing::debug_span!("shipper", target)));
        ShipperHandle { tx, handle }
    }

    fn stop_shipper(target: MemberId, h: ShipperHandle<D>) {
        tracing::info!(target, "stop log shipper");
        // The shipper quits once its channel is closed. Aborting also cuts a pending send.
        drop(h.tx);
        h.handle.abort();
    }
}

impl<D, L> Drop for RaftLogShippingManager<D, L>
where
    D: AppData,
    L: RaftLog<D>,
{
    fn drop(&mut self) {
        for h in self.shippers.values() {
            h.handle.abort();
        }
    }
}
