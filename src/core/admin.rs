use std::collections::BTreeSet;

use crate::core::RaftCore;
use crate::core::RaftRespTx;
use crate::entry::AppData;
use crate::entry::RaftLogEntry;
use crate::error::BootstrapError;
use crate::error::RaftError;
use crate::log::LogCommand;
use crate::log::RaftLog;
use crate::machine::Outcome;
use crate::state::RaftCoreState;
use crate::LogIndex;
use crate::MemberId;
use crate::NO_INDEX;

impl<D, L> RaftCore<D, L>
where
    D: AppData,
    L: RaftLog<D> + 'static,
{
    /// Start a brand-new cluster: a committed membership entry becomes the first entry of the log.
    #[tracing::instrument(level = "debug", skip(self, tx))]
    pub(super) async fn handle_bootstrap(
        &mut self,
        members: BTreeSet<MemberId>,
        tx: RaftRespTx<(), BootstrapError>,
    ) -> Result<(), RaftError> {
        if members.is_empty() {
            let _ = tx.send(Err(BootstrapError::EmptyMembers));
            return Ok(());
        }

        let (append_index, prev_index) = {
            let log = self.log.read().await;
            (log.append_index(), log.prev_index())
        };

        if append_index != NO_INDEX || prev_index != NO_INDEX {
            tracing::info!(id = self.state.me(), append_index, "can not bootstrap a member with a non-empty log");
            let _ = tx.send(Err(BootstrapError::NotEmpty { append_index }));
            return Ok(());
        }

        tracing::info!(id = self.state.me(), ?members, "bootstrap cluster");

        let mut outcome = Outcome::new(&self.state);
        outcome.add_log_command(LogCommand::Append {
            index: 0,
            entry: RaftLogEntry::membership(self.state.term(), members),
        });
        outcome.commit_to(0);

        let res = self.apply_outcome(outcome).await;
        let _ = tx.send(res.clone().map_err(BootstrapError::from));
        res
    }

    /// Install the state of a caught-up member: membership, term and vote, and fast-forward the
    /// log to continue after `prev_index`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(super) async fn install_core_state(&mut self, core_state: RaftCoreState) -> Result<(), RaftError> {
        tracing::info!(id = self.state.me(), ?core_state, "install core state");

        self.membership.install(core_state.membership.clone()).await?;

        {
            let mut log = self.log.write().await;
            if core_state.prev_index > log.append_index() {
                log.skip(core_state.prev_index, core_state.prev_term)?;
                self.cache.write().await.prune(core_state.prev_index);
            }
        }

        let mut outcome = Outcome::new(&self.state);
        outcome.set_next_term(core_state.term.current_term());
        if outcome.voted_for.is_none() && core_state.vote.term() == outcome.term {
            outcome.voted_for = core_state.vote.voted_for();
        }
        outcome.commit_to(core_state.prev_index);
        outcome.needs_fresh_snapshot = false;

        self.apply_outcome(outcome).await
    }

    /// Entries the embedding application applied before a restart were committed. Raise the
    /// commit index to them, within the log. Returns the resulting commit index.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(super) async fn restore_commit_index(&mut self, applied_index: LogIndex) -> LogIndex {
        let append_index = self.log.read().await.append_index();

        if applied_index > append_index {
            tracing::warn!(
                id = self.state.me(),
                applied_index,
                append_index,
                "applied index is beyond the log, restore up to the append index"
            );
        }

        let commit_index = self.state.raise_commit_index(std::cmp::min(applied_index, append_index));
        tracing::info!(id = self.state.me(), commit_index, "restored commit index");

        self.report_metrics().await;
        commit_index
    }

    /// The log has been replayed: from now on entries are cached and timers run.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(super) async fn post_recovery(&mut self) {
        if self.recovered {
            return;
        }

        tracing::info!(id = self.state.me(), "recovery complete, enable cache and timers");

        self.cache.write().await.enable();
        self.timers.start();
        if self.state.role_state().is_leader() && !self.timers.is_heartbeat_running() {
            self.timers.start_heartbeats();
        }
        self.recovered = true;
    }
}
