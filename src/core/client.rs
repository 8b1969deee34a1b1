use std::time::Instant;

use crate::core::RaftCore;
use crate::core::RaftRespTx;
use crate::entry::AppData;
use crate::entry::ReplicatedContent;
use crate::error::ClientWriteError;
use crate::error::RaftError;
use crate::log::RaftLog;
use crate::messages::RaftMessage;
use crate::LogIndex;

impl<D, L> RaftCore<D, L>
where
    D: AppData,
    L: RaftLog<D> + 'static,
{
    /// Append client contents if this member is the leader, otherwise point to the leader.
    ///
    /// The reply is held back until the last appended entry is committed.
    #[tracing::instrument(level = "debug", skip(self, contents, tx), fields(n = contents.len()))]
    pub(super) async fn handle_client_write(
        &mut self,
        mut contents: Vec<ReplicatedContent<D>>,
        tx: RaftRespTx<LogIndex, ClientWriteError>,
    ) -> Result<(), RaftError> {
        if !self.state.role_state().is_leader() {
            tracing::debug!(id = self.state.me(), leader = ?self.state.leader(), "forward client write to leader");
            let _ = tx.send(Err(ClientWriteError::ForwardToLeader(self.state.leader())));
            return Ok(());
        }

        let message = match contents.len() {
            0 => {
                let append_index = self.log.read().await.append_index();
                let _ = tx.send(Ok(append_index));
                return Ok(());
            }
            1 => match contents.pop() {
                Some(c) => RaftMessage::NewEntryRequest(c),
                None => return Ok(()),
            },
            _ => RaftMessage::NewEntryBatchRequest(contents),
        };

        let before = self.log.read().await.append_index();

        if let Err(err) = self.handle_raft_message(message, Instant::now()).await {
            let _ = tx.send(Err(err.clone().into()));
            return Err(err);
        }

        let append_index = self.log.read().await.append_index();
        if !self.state.role_state().is_leader() || append_index <= before {
            let _ = tx.send(Err(ClientWriteError::ForwardToLeader(self.state.leader())));
            return Ok(());
        }

        self.pending_writes.insert(append_index, tx);
        self.respond_committed_writes();
        Ok(())
    }

    /// Answer every pending write whose last entry is committed.
    pub(super) fn respond_committed_writes(&mut self) {
        let commit_index = self.state.commit_index();

        while let Some(entry) = self.pending_writes.first_entry() {
            if *entry.key() > commit_index {
                break;
            }
            let (index, tx) = entry.remove_entry();
            let _ = tx.send(Ok(index));
        }
    }

    /// No longer leader: a pending write may or may not be committed by the next leader.
    pub(super) fn fail_pending_writes(&mut self) {
        if self.pending_writes.is_empty() {
            return;
        }

        let leader = self.state.leader();
        tracing::info!(
            id = self.state.me(),
            n = self.pending_writes.len(),
            ?leader,
            "stepped down with pending writes"
        );

        for (_, tx) in std::mem::take(&mut self.pending_writes) {
            let _ = tx.send(Err(ClientWriteError::ForwardToLeader(leader)));
        }
    }
}
