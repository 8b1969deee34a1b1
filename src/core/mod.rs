//! The core logic of a raft member: one task that owns the machine state.
//!
//! Inbound messages, timer events, client calls and shipper reports are all serialized through
//! the task's queue. For each of them the pure machine decides an `Outcome`, which is then
//! applied here, in this order: durable state and log, membership, timers, shippers, outgoing
//! messages, metrics.

mod admin;
mod client;
mod replication;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing_futures::Instrument;

use crate::config::Config;
use crate::entry::AppData;
use crate::entry::ReplicatedContent;
use crate::error::BootstrapError;
use crate::error::ClientWriteError;
use crate::error::RaftError;
use crate::error::RaftResult;
use crate::log::new_in_flight_cache;
use crate::log::RaftLog;
use crate::log::SharedInFlightCache;
use crate::machine;
use crate::machine::Outcome;
use crate::machine::RaftState;
use crate::membership::RaftMembershipManager;
use crate::messages::RaftMessage;
use crate::messages::TimeoutKind;
use crate::metrics::RaftMetrics;
use crate::metrics::ServerState;
use crate::monitoring::RaftMonitor;
use crate::network::Outbound;
use crate::shipping::LeaderContext;
use crate::shipping::RaftLogShippingManager;
use crate::shipping::ReplicationStatus;
use crate::shipping::ShipperReport;
use crate::state::RaftCoreState;
use crate::state::RaftStores;
use crate::state::StorageError;
use crate::timer::LeaderAvailabilityTimers;
use crate::LogIndex;
use crate::MemberId;
use crate::MessageSummary;
use crate::NO_INDEX;

pub(crate) type RaftRespTx<T, E> = oneshot::Sender<Result<T, E>>;
pub(crate) type RaftRespRx<T, E> = oneshot::Receiver<Result<T, E>>;

/// Everything the raft task is asked to do.
pub(crate) enum RaftMsg<D: AppData> {
    /// A message from another member, or a local request such as pruning.
    Message {
        message: RaftMessage<D>,
        enqueued_at: Instant,
    },

    /// Posted by a timer. Dropped if the timer was renewed or stopped meanwhile.
    Timeout { kind: TimeoutKind, generation: u64 },

    /// Append client contents, on the leader only. Replies with the index of the last entry once
    /// it is committed.
    ClientWrite {
        contents: Vec<ReplicatedContent<D>>,
        tx: RaftRespTx<LogIndex, ClientWriteError>,
    },

    SetTargetMembership {
        members: BTreeSet<MemberId>,
        tx: RaftRespTx<(), RaftError>,
    },

    Bootstrap {
        members: BTreeSet<MemberId>,
        tx: RaftRespTx<(), BootstrapError>,
    },

    InstallCoreState {
        core_state: RaftCoreState,
        tx: RaftRespTx<(), RaftError>,
    },

    /// Raise the commit index to what the embedding application has applied before a restart.
    RestoreCommitIndex {
        applied_index: LogIndex,
        tx: RaftRespTx<LogIndex, RaftError>,
    },

    /// Recovery is complete: enable the in-flight cache and start the timers.
    PostRecovery { tx: RaftRespTx<(), RaftError> },
}

impl<D: AppData> MessageSummary for RaftMsg<D> {
    fn summary(&self) -> String {
        match self {
            RaftMsg::Message { message, .. } => message.summary(),
            RaftMsg::Timeout { kind, generation } => format!("timeout: {:?}@{}", kind, generation),
            RaftMsg::ClientWrite { contents, .. } => format!("client_write: n={}", contents.len()),
            RaftMsg::SetTargetMembership { members, .. } => format!("set_target_membership: {:?}", members),
            RaftMsg::Bootstrap { members, .. } => format!("bootstrap: {:?}", members),
            RaftMsg::InstallCoreState { core_state, .. } => format!(
                "install_core_state: membership={:?}, prev={}-{}",
                core_state.membership, core_state.prev_term, core_state.prev_index
            ),
            RaftMsg::RestoreCommitIndex { applied_index, .. } => {
                format!("restore_commit_index: {}", applied_index)
            }
            RaftMsg::PostRecovery { .. } => "post_recovery".to_string(),
        }
    }
}

/// The core type implementing the raft protocol.
pub(crate) struct RaftCore<D, L>
where
    D: AppData,
    L: RaftLog<D> + 'static,
{
    /// The configuration of this raft member.
    config: Arc<Config>,

    /// The in-memory state of the machine. Changed only by applying outcomes.
    state: RaftState,

    /// The log, written only by this task and read by shippers.
    log: Arc<RwLock<L>>,

    /// Recently appended entries, so that shippers rarely read the log.
    cache: SharedInFlightCache<D>,

    /// Where the term, the vote and the membership state are persisted.
    stores: RaftStores,

    membership: RaftMembershipManager,

    /// One log shipper per follower, while leader.
    shipping: RaftLogShippingManager<D, L>,

    timers: LeaderAvailabilityTimers<D>,

    outbound: Arc<dyn Outbound<D>>,
    monitor: Arc<dyn RaftMonitor>,

    /// The latest status reported by each shipper of the current leadership.
    replication: BTreeMap<MemberId, ReplicationStatus>,

    /// Client writes waiting to be committed, by the index of their last entry.
    pending_writes: BTreeMap<LogIndex, RaftRespTx<LogIndex, ClientWriteError>>,

    /// Recovery is complete and the timers run.
    recovered: bool,

    /// A sender of this task's own queue, for proposals of the membership changer.
    tx_api: mpsc::UnboundedSender<RaftMsg<D>>,
    rx_api: mpsc::UnboundedReceiver<RaftMsg<D>>,
    rx_shipping: mpsc::UnboundedReceiver<ShipperReport>,
    tx_metrics: watch::Sender<RaftMetrics>,
    rx_shutdown: oneshot::Receiver<()>,
}

/// What `RaftCore::spawn()` needs besides its channels.
pub(crate) struct CoreParts<D: AppData, L> {
    pub(crate) me: MemberId,
    pub(crate) config: Arc<Config>,
    pub(crate) log: Arc<RwLock<L>>,
    pub(crate) stores: RaftStores,
    pub(crate) outbound: Arc<dyn Outbound<D>>,
    pub(crate) monitor: Arc<dyn RaftMonitor>,
}

impl<D, L> RaftCore<D, L>
where
    D: AppData,
    L: RaftLog<D> + 'static,
{
    pub(crate) fn spawn(
        parts: CoreParts<D, L>,
        tx_api: mpsc::UnboundedSender<RaftMsg<D>>,
        rx_api: mpsc::UnboundedReceiver<RaftMsg<D>>,
        tx_metrics: watch::Sender<RaftMetrics>,
        rx_shutdown: oneshot::Receiver<()>,
    ) -> JoinHandle<RaftResult<()>> {
        let CoreParts {
            me,
            config,
            log,
            stores,
            outbound,
            monitor,
        } = parts;

        let cache: SharedInFlightCache<D> = Arc::new(RwLock::new(new_in_flight_cache(&config)));
        let (tx_shipping, rx_shipping) = mpsc::unbounded_channel();

        let membership = RaftMembershipManager::new(
            me,
            stores.membership.clone(),
            std::time::Duration::from_millis(config.election_timeout),
            config.catchup_timeout(),
        );
        let shipping = RaftLogShippingManager::new(
            me,
            config.clone(),
            outbound.clone(),
            log.clone(),
            cache.clone(),
            tx_shipping,
        );
        let timers = LeaderAvailabilityTimers::new(me, config.clone(), tx_api.clone());

        let this = Self {
            state: RaftState::new(me, &config),
            config,
            log,
            cache,
            stores,
            membership,
            shipping,
            timers,
            outbound,
            monitor,
            replication: BTreeMap::new(),
            pending_writes: BTreeMap::new(),
            recovered: false,
            tx_api,
            rx_api,
            rx_shipping,
            tx_metrics,
            rx_shutdown,
        };

        let span = tracing::debug_span!("raft", id = me);
        tokio::spawn(this.main().instrument(span))
    }

    /// The main loop of the raft member.
    #[tracing::instrument(level = "trace", skip(self), fields(cluster=%self.config.cluster_name))]
    async fn main(mut self) -> RaftResult<()> {
        let res = self.run().await;

        self.timers.stop();
        self.shipping.stop();

        if let Err(err) = &res {
            tracing::error!(id = self.state.me(), error = %err, "fatal storage error, shutting down");
        }

        let mut metrics = self.tx_metrics.borrow().clone();
        metrics.state = ServerState::Shutdown;
        metrics.replication = None;
        let _ = self.tx_metrics.send(metrics);

        res
    }

    async fn run(&mut self) -> Result<(), RaftError> {
        self.recover().await?;
        self.report_metrics().await;

        loop {
            tokio::select! {
                Some(msg) = self.rx_api.recv() => {
                    self.handle_api_msg(msg).await?;
                }
                Some(report) = self.rx_shipping.recv() => {
                    self.handle_shipper_report(report).await?;
                }
                _ = &mut self.rx_shutdown => {
                    tracing::info!(id = self.state.me(), "raft received shutdown signal");
                    return Ok(());
                }
            }
        }
    }

    /// Load term, vote and membership from storage.
    ///
    /// The commit index starts at what is known to be committed without asking anyone: pruned
    /// entries and the committed membership entry.
    async fn recover(&mut self) -> Result<(), StorageError> {
        let term = self.stores.term.initial_state().await?;
        let vote = self.stores.vote.initial_state().await?;
        self.membership.recover().await?;

        let (append_index, prev_index) = {
            let log = self.log.read().await;
            (log.append_index(), log.prev_index())
        };
        let membership_index = self.membership.state().committed().map_or(NO_INDEX, |x| x.log_index);
        let commit_index = std::cmp::min(std::cmp::max(prev_index, membership_index), append_index);

        tracing::info!(id = self.state.me(), ?term, ?vote, commit_index, "recovered safety state");

        self.state.recover(term, vote, commit_index);
        self.refresh_members();
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self, msg), fields(msg=%msg.summary()))]
    async fn handle_api_msg(&mut self, msg: RaftMsg<D>) -> Result<(), RaftError> {
        match msg {
            RaftMsg::Message { message, enqueued_at } => {
                self.handle_raft_message(message, enqueued_at).await?;
            }
            RaftMsg::Timeout { kind, generation } => {
                if !self.timers.is_current(kind, generation) {
                    tracing::trace!(id = self.state.me(), ?kind, generation, "drop stale timeout");
                    return Ok(());
                }
                self.handle_raft_message(RaftMessage::Timeout(kind), Instant::now()).await?;
            }
            RaftMsg::ClientWrite { contents, tx } => {
                self.handle_client_write(contents, tx).await?;
            }
            RaftMsg::SetTargetMembership { members, tx } => {
                self.membership.set_target_membership_set(members);
                let res = self.drive_membership();
                let _ = tx.send(res.clone());
                res?;
            }
            RaftMsg::Bootstrap { members, tx } => {
                self.handle_bootstrap(members, tx).await?;
            }
            RaftMsg::InstallCoreState { core_state, tx } => {
                let res = self.install_core_state(core_state).await;
                let _ = tx.send(res.clone());
                res?;
            }
            RaftMsg::RestoreCommitIndex { applied_index, tx } => {
                let commit_index = self.restore_commit_index(applied_index).await;
                let _ = tx.send(Ok(commit_index));
            }
            RaftMsg::PostRecovery { tx } => {
                self.post_recovery().await;
                let _ = tx.send(Ok(()));
            }
        }
        Ok(())
    }

    /// Run a message through the machine and apply the outcome.
    pub(crate) async fn handle_raft_message(
        &mut self,
        message: RaftMessage<D>,
        enqueued_at: Instant,
    ) -> Result<(), RaftError> {
        let start = Instant::now();
        let kind = message.kind();

        tracing::debug!(id = self.state.me(), msg = %message.summary(), "handle message");

        let outcome = {
            let log = self.log.read().await;
            machine::handle(&self.state, &*log, message)?
        };
        self.apply_outcome(outcome).await?;

        self.monitor.message_processed(kind, start.duration_since(enqueued_at), start.elapsed());
        Ok(())
    }

    /// Carry out everything an outcome asks for.
    #[tracing::instrument(level = "trace", skip(self, outcome), fields(outcome=%outcome.summary()))]
    pub(crate) async fn apply_outcome(&mut self, outcome: Outcome<D>) -> Result<(), RaftError> {
        let prev_term = self.state.term();

        {
            let mut log = self.log.write().await;
            let mut cache = self.cache.write().await;
            self.state.update(&outcome, &mut *log, &mut **cache, &self.stores).await?;
        }
        self.respond_committed_writes();

        self.membership.process_log(self.state.commit_index(), &outcome.log_commands).await?;
        self.refresh_members();

        if outcome.renew_election_timeout && self.timers.is_election_running() {
            self.timers.renew_election();
        }

        if outcome.elected_leader {
            self.on_elected();
        }

        if outcome.stepping_down {
            self.on_stepped_down();
        }

        if self.state.role_state().is_leader() {
            let context = self.leader_context();
            self.shipping.handle_commands(context, &outcome.ship_commands);
            self.drive_membership()?;
        }

        for directed in outcome.out_messages {
            let to = directed.to;
            let summary = directed.message.summary();
            if let Err(err) = self.outbound.send(to, directed.message, false).await {
                tracing::debug!(id = self.state.me(), to, msg = %summary, error = %err, "failed to send message");
            }
        }

        if self.state.term() != prev_term {
            self.monitor.term_changed(self.state.term());
        }

        self.report_metrics().await;
        Ok(())
    }

    fn leader_context(&self) -> LeaderContext {
        LeaderContext {
            term: self.state.term(),
            commit_index: self.state.commit_index(),
        }
    }

    fn on_elected(&mut self) {
        tracing::info!(id = self.state.me(), term = self.state.term(), "start leading");

        self.membership.on_role_changed(true);
        self.refresh_members();

        if self.recovered {
            self.timers.start_heartbeats();
        }

        self.replication.clear();
        let targets = self.state.replication_members().clone();
        self.shipping.start(self.leader_context(), &targets);
    }

    fn on_stepped_down(&mut self) {
        tracing::info!(id = self.state.me(), term = self.state.term(), "stop leading");

        self.membership.on_role_changed(false);
        self.refresh_members();

        self.timers.stop_heartbeats();
        self.shipping.stop();
        self.replication.clear();
        self.fail_pending_writes();
    }

    /// Take over the member sets of the membership manager.
    fn refresh_members(&mut self) {
        let voting = self.membership.voting_members();
        let replication = self.membership.replication_members();

        if &voting == self.state.voting_members() && &replication == self.state.replication_members() {
            return;
        }

        tracing::info!(id = self.state.me(), ?voting, ?replication, "members changed");

        self.replication.retain(|id, _| replication.contains(id));
        self.shipping.set_targets(&replication);
        self.state.set_members(voting, replication);
    }

    async fn report_metrics(&self) {
        let (append_index, prev_index) = {
            let log = self.log.read().await;
            (log.append_index(), log.prev_index())
        };

        let replication = if self.state.role_state().is_leader() {
            Some(self.replication.clone())
        } else {
            None
        };

        let m = RaftMetrics::from_state(&self.state, append_index, prev_index, replication);
        tracing::trace!(id = self.state.me(), metrics = %m.summary(), "report metrics");

        if let Err(err) = self.tx_metrics.send(m) {
            tracing::debug!(id = self.state.me(), error = %err, "no metrics receiver");
        }
    }
}
