//! Public Raft interface.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::core::CoreParts;
use crate::core::RaftCore;
use crate::core::RaftMsg;
use crate::core::RaftRespRx;
use crate::entry::AppData;
use crate::entry::ReplicatedContent;
use crate::error::BootstrapError;
use crate::error::ClientWriteError;
use crate::error::NoLeaderFoundError;
use crate::error::RaftError;
use crate::error::RaftResult;
use crate::log::RaftLog;
use crate::messages::RaftMessage;
use crate::metrics::RaftMetrics;
use crate::metrics::Wait;
use crate::monitoring::RaftMonitor;
use crate::network::Inbound;
use crate::network::InboundHandler;
use crate::network::Outbound;
use crate::state::RaftCoreState;
use crate::state::RaftStores;
use crate::LogIndex;
use crate::MemberId;
use crate::MessageSummary;

struct RaftInner<D: AppData> {
    id: MemberId,
    tx_api: mpsc::UnboundedSender<RaftMsg<D>>,
    rx_metrics: watch::Receiver<RaftMetrics>,
    monitor: Arc<dyn RaftMonitor>,
    raft_handle: Mutex<Option<JoinHandle<RaftResult<()>>>>,
    tx_shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

/// The Raft API.
///
/// A handle to a spawned raft task. It is cheap to clone.
///
/// A member starts as a follower with what it finds in its stores and its log. Before it takes
/// part in elections the embedding application replays the log and calls
/// `post_recovery_actions()`. A brand-new cluster is started with `bootstrap()` on one member;
/// the others join with an empty log, or with `install_core_state()`.
///
/// ### shutting down
/// If any of the interfaces returns `RaftError::ShuttingDown`, the raft task has stopped,
/// possibly because of a storage error, and `shutdown()` should be called to collect it.
pub struct Raft<D: AppData> {
    inner: Arc<RaftInner<D>>,
}

impl<D: AppData> Clone for Raft<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: AppData> Raft<D> {
    /// Create and spawn a new raft task.
    ///
    /// `log` is shared with the log shippers of this member. `stores` keep the term, the vote and
    /// the membership state durable. `id` must stay the same across restarts.
    #[tracing::instrument(
        level = "debug",
        skip(config, log, stores, outbound, monitor),
        fields(cluster=%config.cluster_name)
    )]
    pub fn new<L>(
        id: MemberId,
        config: Arc<Config>,
        log: Arc<RwLock<L>>,
        stores: RaftStores,
        outbound: Arc<dyn Outbound<D>>,
        monitor: Arc<dyn RaftMonitor>,
    ) -> Self
    where
        L: RaftLog<D> + 'static,
    {
        let (tx_api, rx_api) = mpsc::unbounded_channel();
        let (tx_metrics, rx_metrics) = watch::channel(RaftMetrics::new_initial(id));
        let (tx_shutdown, rx_shutdown) = oneshot::channel();

        let parts = CoreParts {
            me: id,
            config,
            log,
            stores,
            outbound,
            monitor: monitor.clone(),
        };
        let raft_handle = RaftCore::spawn(parts, tx_api.clone(), rx_api, tx_metrics, rx_shutdown);

        let inner = RaftInner {
            id,
            tx_api,
            rx_metrics,
            monitor,
            raft_handle: Mutex::new(Some(raft_handle)),
            tx_shutdown: Mutex::new(Some(tx_shutdown)),
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn id(&self) -> MemberId {
        self.inner.id
    }

    /// Start a brand-new cluster with `members` as the voting set.
    ///
    /// Only a member with an empty log can bootstrap.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn bootstrap(&self, members: BTreeSet<MemberId>) -> Result<(), BootstrapError> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::Bootstrap { members, tx }, rx).await
    }

    /// Install the state taken from a caught-up member. The log continues after
    /// `core_state.prev_index`.
    #[tracing::instrument(level = "debug", skip(self, core_state))]
    pub async fn install_core_state(&self, core_state: RaftCoreState) -> Result<(), RaftError> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::InstallCoreState { core_state, tx }, rx).await
    }

    /// Tell a restarted member up to which index the embedding application has applied the log.
    ///
    /// Only committed entries are applied, so the commit index is raised to `applied_index`, or
    /// to the end of the log if that is lower. It never goes back. Returns the commit index.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn restore_commit_index(&self, applied_index: LogIndex) -> Result<LogIndex, RaftError> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::RestoreCommitIndex { applied_index, tx }, rx).await
    }

    /// Called once the log has been replayed: enables the in-flight cache and starts the timers.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn post_recovery_actions(&self) -> Result<(), RaftError> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::PostRecovery { tx }, rx).await
    }

    /// Append `data` to the log of the leader. Returns the index it is appended at, once it is
    /// committed.
    ///
    /// A member that is not the leader returns `ClientWriteError::ForwardToLeader`. So does a
    /// leader that steps down before the entry is committed: the entry may still be committed by
    /// a later leader.
    #[tracing::instrument(level = "debug", skip(self, data))]
    pub async fn client_write(&self, data: D) -> Result<LogIndex, ClientWriteError> {
        let (tx, rx) = oneshot::channel();
        let contents = vec![ReplicatedContent::Normal(data)];
        self.call_core(RaftMsg::ClientWrite { contents, tx }, rx).await
    }

    /// Append several entries together. Returns the index of the last one, once it is committed.
    #[tracing::instrument(level = "debug", skip(self, batch), fields(n = batch.len()))]
    pub async fn write_batch(&self, batch: Vec<D>) -> Result<LogIndex, ClientWriteError> {
        let (tx, rx) = oneshot::channel();
        let contents = batch.into_iter().map(ReplicatedContent::Normal).collect();
        self.call_core(RaftMsg::ClientWrite { contents, tx }, rx).await
    }

    /// Allow the log to discard entries up to `prune_index`. Entries that are not committed are
    /// kept.
    pub fn prune(&self, prune_index: LogIndex) -> Result<(), RaftError> {
        self.handle_message(RaftMessage::PruneRequest { prune_index })
    }

    /// Set the member set the leader should move the cluster to, one member at a time.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn set_target_membership_set(&self, members: BTreeSet<MemberId>) -> Result<(), RaftError> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::SetTargetMembership { members, tx }, rx).await
    }

    /// The current leader as known by this member.
    pub fn leader(&self) -> Result<MemberId, NoLeaderFoundError> {
        let m = self.inner.rx_metrics.borrow();
        match m.current_leader {
            Some(leader) => Ok(leader),
            None => {
                self.inner.monitor.leader_not_found();
                Err(NoLeaderFoundError {
                    me: self.inner.id,
                    term: m.current_term,
                })
            }
        }
    }

    /// Feed a message from another member into this one.
    pub fn handle_message(&self, message: RaftMessage<D>) -> Result<(), RaftError> {
        self.inner
            .tx_api
            .send(RaftMsg::Message {
                message,
                enqueued_at: Instant::now(),
            })
            .map_err(|_| RaftError::ShuttingDown)
    }

    /// A handler a transport delivers received messages to.
    pub fn inbound_handler(&self) -> InboundHandler<D> {
        InboundHandler::new(self.inner.tx_api.clone())
    }

    /// Let `inbound` deliver every message it receives to this member.
    pub fn register_inbound(&self, inbound: &dyn Inbound<D>) {
        inbound.register_handler(self.inbound_handler());
    }

    /// Get a handle to the metrics channel.
    pub fn metrics(&self) -> watch::Receiver<RaftMetrics> {
        self.inner.rx_metrics.clone()
    }

    /// Get a handle to wait for the metrics to satisfy some condition.
    ///
    /// ```ignore
    /// # use std::time::Duration;
    /// let timeout = Duration::from_millis(200);
    ///
    /// // wait for the log to end at 3:
    /// r.wait(Some(timeout)).log(3, "log").await?;
    ///
    /// // wait for member 1 to become the leader:
    /// r.wait(Some(timeout)).leader(1, "leader").await?;
    /// ```
    pub fn wait(&self, timeout: Option<Duration>) -> Wait {
        let timeout = match timeout {
            Some(t) => t,
            None => Duration::from_millis(500),
        };
        Wait {
            timeout,
            rx: self.inner.rx_metrics.clone(),
        }
    }

    /// Shutdown this raft member, stopping its timers and shippers.
    ///
    /// Returns the error the raft task stopped with, if it stopped on its own.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        if let Some(tx) = self.inner.tx_shutdown.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.inner.raft_handle.lock().await.take() {
            handle.await??;
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, mes, rx), fields(mes=%mes.summary()))]
    async fn call_core<T, E>(&self, mes: RaftMsg<D>, rx: RaftRespRx<T, E>) -> Result<T, E>
    where E: From<RaftError> {
        let sum = mes.summary();

        if let Err(send_err) = self.inner.tx_api.send(mes) {
            tracing::error!(%send_err, mes=%sum, "error send tx to RaftCore");
            return Err(RaftError::ShuttingDown.into());
        }

        match rx.await {
            Ok(x) => x,
            Err(e) => {
                tracing::error!(%e, mes=%sum, "error recv rx from RaftCore");
                Err(RaftError::ShuttingDown.into())
            }
        }
    }
}
