//! A log shipper replicates the leader's log to one follower.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::time::sleep_until;
use tokio::time::Instant;

use crate::config::Config;
use crate::entry::AppData;
use crate::entry::RaftLogEntry;
use crate::log::RaftLog;
use crate::log::SharedInFlightCache;
use crate::messages::AppendEntriesRequest;
use crate::messages::RaftMessage;
use crate::network::Outbound;
use crate::shipping::LeaderContext;
use crate::shipping::ReplicationStatus;
use crate::shipping::ShipperMode;
use crate::shipping::ShipperReport;
use crate::state::StorageError;
use crate::LogIndex;
use crate::MemberId;
use crate::Term;
use crate::NO_INDEX;

/// What the leader tells one shipper.
#[derive(Debug, Clone)]
pub(crate) enum ShipperEvent<D: AppData> {
    Mismatch {
        last_remote_append_index: LogIndex,
    },
    Match {
        new_match_index: LogIndex,
    },
    NewEntries {
        prev_log_index: LogIndex,
        prev_log_term: Option<Term>,
        entries: Vec<RaftLogEntry<D>>,
    },
    CommitUpdate,
}

/// The replication state of one follower, owned by its own task.
///
/// It never waits for a response: responses reach the leader's raft machine, which turns them
/// into `Match` and `Mismatch` events for this shipper.
pub(crate) struct RaftLogShipper<D, L>
where
    D: AppData,
    L: RaftLog<D>,
{
    me: MemberId,
    target: MemberId,
    config: Arc<Config>,
    outbound: Arc<dyn Outbound<D>>,
    log: Arc<RwLock<L>>,
    cache: SharedInFlightCache<D>,

    rx: mpsc::UnboundedReceiver<(ShipperEvent<D>, LeaderContext)>,
    tx_status: mpsc::UnboundedSender<ShipperReport>,

    context: LeaderContext,
    mode: ShipperMode,

    /// The highest index known to match the leader's log.
    match_index: LogIndex,

    /// The last index covered by the last request sent: its `prev_log_index` plus its entries.
    last_sent_index: LogIndex,

    /// When to resend if nothing happens before.
    resend_at: Instant,

    /// Catching up without progress beyond this is degraded.
    progress_deadline: Instant,
    degraded: bool,

    last_reported: Option<ReplicationStatus>,
}

impl<D, L> RaftLogShipper<D, L>
where
    D: AppData,
    L: RaftLog<D> + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        me: MemberId,
        target: MemberId,
        context: LeaderContext,
        config: Arc<Config>,
        outbound: Arc<dyn Outbound<D>>,
        log: Arc<RwLock<L>>,
        cache: SharedInFlightCache<D>,
        rx: mpsc::UnboundedReceiver<(ShipperEvent<D>, LeaderContext)>,
        tx_status: mpsc::UnboundedSender<ShipperReport>,
    ) -> Self {
        let now = Instant::now();
        Self {
            me,
            target,
            resend_at: now + config.resend_interval(),
            progress_deadline: now + config.catchup_timeout(),
            config,
            outbound,
            log,
            cache,
            rx,
            tx_status,
            context,
            mode: ShipperMode::Mismatch,
            match_index: NO_INDEX,
            last_sent_index: NO_INDEX,
            degraded: false,
            last_reported: None,
        }
    }

    #[tracing::instrument(
        level = "debug",
        skip(self),
        fields(id = self.me, target = self.target, term = self.context.term)
    )]
    pub(crate) async fn main(mut self) {
        if let Err(error) = self.run().await {
            tracing::error!(%error, "log shipper failed to read the log, stop shipping");

            let _ = self.tx_status.send(ShipperReport::Failed {
                target: self.target,
                leader_term: self.context.term,
                error,
            });
        }
        tracing::debug!("log shipper stopped");
    }

    async fn run(&mut self) -> Result<(), StorageError> {
        let append_index = self.log.read().await.append_index();
        self.send_empty(append_index).await?;
        self.report();

        loop {
            tokio::select! {
                ev = self.rx.recv() => {
                    let (ev, context) = match ev {
                        Some(x) => x,
                        None => return Ok(()),
                    };
                    self.context = context;
                    self.handle_event(ev).await?;
                }
                _ = sleep_until(self.resend_at) => {
                    self.on_resend_timeout().await?;
                }
            }
            self.report();
        }
    }

    async fn handle_event(&mut self, ev: ShipperEvent<D>) -> Result<(), StorageError> {
        match ev {
            ShipperEvent::Mismatch {
                last_remote_append_index,
            } => self.on_mismatch(last_remote_append_index).await,
            ShipperEvent::Match { new_match_index } => self.on_match(new_match_index).await,
            ShipperEvent::NewEntries {
                prev_log_index,
                prev_log_term,
                entries,
            } => self.on_new_entries(prev_log_index, prev_log_term, entries).await,
            ShipperEvent::CommitUpdate => self.on_commit_update().await,
        }
    }

    async fn on_mismatch(&mut self, last_remote_append_index: LogIndex) -> Result<(), StorageError> {
        match self.mode {
            ShipperMode::Mismatch => {
                let probe = std::cmp::max(
                    std::cmp::min(self.last_sent_index - 1, last_remote_append_index),
                    self.match_index,
                );
                self.send_empty(probe).await
            }
            ShipperMode::Catchup | ShipperMode::Pipeline => {
                tracing::debug!(last_sent_index = self.last_sent_index, "mismatch, start probing");
                self.mode = ShipperMode::Mismatch;
                self.send_empty(self.last_sent_index).await
            }
        }
    }

    async fn on_match(&mut self, new_match_index: LogIndex) -> Result<(), StorageError> {
        if new_match_index > self.match_index {
            self.match_index = new_match_index;
            self.progress_deadline = Instant::now() + self.config.catchup_timeout();
        }

        match self.mode {
            ShipperMode::Mismatch => {
                if self.caught_up().await {
                    self.enter_pipeline();
                } else {
                    self.mode = ShipperMode::Catchup;
                    self.send_next_batch().await?;
                }
            }
            ShipperMode::Catchup => {
                if self.match_index >= self.last_sent_index {
                    if self.caught_up().await {
                        self.enter_pipeline();
                    } else {
                        self.send_next_batch().await?;
                    }
                }
            }
            ShipperMode::Pipeline => {}
        }
        Ok(())
    }

    async fn on_new_entries(
        &mut self,
        prev_log_index: LogIndex,
        prev_log_term: Option<Term>,
        entries: Vec<RaftLogEntry<D>>,
    ) -> Result<(), StorageError> {
        if self.mode != ShipperMode::Pipeline {
            return Ok(());
        }

        if prev_log_index != self.last_sent_index {
            tracing::debug!(
                prev_log_index,
                last_sent_index = self.last_sent_index,
                "entries do not follow the last sent"
            );
            self.mode = ShipperMode::Catchup;
            return Ok(());
        }

        if prev_log_index - self.match_index > self.config.max_allowed_shipping_lag as LogIndex {
            tracing::debug!(prev_log_index, match_index = self.match_index, "follower lags too far behind, catch up");
            self.mode = ShipperMode::Catchup;
            return Ok(());
        }

        self.send_entries(prev_log_index, prev_log_term, entries).await;
        Ok(())
    }

    async fn on_commit_update(&mut self) -> Result<(), StorageError> {
        if self.mode == ShipperMode::Pipeline {
            self.send_empty(self.last_sent_index).await?;
        }
        Ok(())
    }

    async fn on_resend_timeout(&mut self) -> Result<(), StorageError> {
        let now = Instant::now();

        if self.mode != ShipperMode::Pipeline && now >= self.progress_deadline {
            tracing::warn!(
                mode = ?self.mode,
                match_index = self.match_index,
                catchup_timeout = ?self.config.catchup_timeout(),
                "catch-up made no progress in time, will keep trying"
            );
            self.degraded = true;
            self.progress_deadline = now + self.config.catchup_timeout();
        }

        match self.mode {
            ShipperMode::Mismatch => self.send_empty(self.last_sent_index).await,
            ShipperMode::Catchup => self.send_next_batch().await,
            ShipperMode::Pipeline => {
                if self.caught_up().await {
                    self.resend_at = now + self.config.resend_interval();
                    Ok(())
                } else {
                    self.mode = ShipperMode::Catchup;
                    self.send_next_batch().await
                }
            }
        }
    }

    fn enter_pipeline(&mut self) {
        tracing::debug!(match_index = self.match_index, "follower caught up");
        self.mode = ShipperMode::Pipeline;
        self.degraded = false;
    }

    async fn caught_up(&self) -> bool {
        self.match_index >= self.log.read().await.append_index()
    }

    /// Send an append without entries that follows `prev_log_index`, to probe the follower's log
    /// or to carry the commit index.
    async fn send_empty(&mut self, prev_log_index: LogIndex) -> Result<(), StorageError> {
        let (prev_log_index, prev_log_term) = {
            let log = self.log.read().await;
            let prev_log_index = std::cmp::max(prev_log_index, log.prev_index());
            let prev_log_term = if prev_log_index == NO_INDEX {
                None
            } else {
                log.read_entry_term(prev_log_index)?
            };
            (prev_log_index, prev_log_term)
        };

        self.send_entries(prev_log_index, prev_log_term, vec![]).await;
        Ok(())
    }

    /// Send up to `catchup_batch_size` entries right after the match index.
    async fn send_next_batch(&mut self) -> Result<(), StorageError> {
        let from = self.match_index + 1;

        let batch = self.read_batch(from).await?;
        match batch {
            Some((prev_log_term, entries)) => {
                self.send_entries(from - 1, prev_log_term, entries).await;
                Ok(())
            }
            None => {
                tracing::warn!(from, "entries were pruned, the follower needs a fresh snapshot");
                // The follower answers with a mismatch that the leader turns into compaction info.
                let prev_index = self.log.read().await.prev_index();
                self.send_empty(prev_index).await
            }
        }
    }

    /// Read entries from `from` on, the in-flight cache first. `None` if `from` is pruned.
    async fn read_batch(
        &self,
        from: LogIndex,
    ) -> Result<Option<(Option<Term>, Vec<RaftLogEntry<D>>)>, StorageError> {
        let log = self.log.read().await;
        if from <= log.prev_index() {
            return Ok(None);
        }

        let prev_log_term = if from - 1 == NO_INDEX {
            None
        } else {
            log.read_entry_term(from - 1)?
        };

        let end = std::cmp::min(log.append_index(), from + self.config.catchup_batch_size as LogIndex - 1);
        let mut entries = Vec::new();
        let mut next = from;

        {
            let cache = self.cache.read().await;
            while next <= end {
                match cache.get(next) {
                    Some(entry) => {
                        entries.push(entry);
                        next += 1;
                    }
                    None => break,
                }
            }
        }

        if next <= end {
            for item in log.entry_cursor(next)? {
                let (index, entry) = item?;
                if index > end {
                    break;
                }
                entries.push(entry);
            }
        }

        Ok(Some((prev_log_term, entries)))
    }

    async fn send_entries(
        &mut self,
        prev_log_index: LogIndex,
        prev_log_term: Option<Term>,
        entries: Vec<RaftLogEntry<D>>,
    ) {
        self.last_sent_index = prev_log_index + entries.len() as LogIndex;
        self.resend_at = Instant::now() + self.config.resend_interval();

        tracing::trace!(prev_log_index, n = entries.len(), mode = ?self.mode, "ship");

        let req = AppendEntriesRequest {
            from: self.me,
            leader_term: self.context.term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.context.commit_index,
        };

        let res = self.outbound.send(self.target, RaftMessage::AppendEntriesRequest(req), false).await;
        if let Err(err) = res {
            tracing::debug!(error = %err, "failed to send append request");
        }
    }

    /// Tell the raft task about a changed status.
    fn report(&mut self) {
        let status = ReplicationStatus {
            target: self.target,
            leader_term: self.context.term,
            mode: self.mode,
            match_index: self.match_index,
            last_sent_index: self.last_sent_index,
            degraded: self.degraded,
        };

        if self.last_reported.as_ref() == Some(&status) {
            return;
        }
        self.last_reported = Some(status.clone());
        let _ = self.tx_status.send(ShipperReport::Status(status));
    }
}
