use std::time::Instant;

use crate::core::RaftCore;
use crate::core::RaftMsg;
use crate::entry::AppData;
use crate::entry::ReplicatedContent;
use crate::error::RaftError;
use crate::log::RaftLog;
use crate::messages::RaftMessage;
use crate::shipping::ReplicationStatus;
use crate::shipping::ShipperReport;

impl<D, L> RaftCore<D, L>
where
    D: AppData,
    L: RaftLog<D> + 'static,
{
    /// A shipper reports a new status, or that it could not read the log.
    ///
    /// An unreadable log is as fatal as an unwritable one.
    pub(super) async fn handle_shipper_report(&mut self, report: ShipperReport) -> Result<(), RaftError> {
        match report {
            ShipperReport::Status(status) => self.handle_replication_status(status).await,
            ShipperReport::Failed {
                target,
                leader_term,
                error,
            } => {
                tracing::error!(id = self.state.me(), target, leader_term, %error, "log shipper failed");
                Err(error.into())
            }
        }
    }

    /// A shipper reports a new status of its follower.
    #[tracing::instrument(level = "trace", skip(self))]
    async fn handle_replication_status(&mut self, status: ReplicationStatus) -> Result<(), RaftError> {
        if !self.state.role_state().is_leader() || status.leader_term != self.state.term() {
            tracing::debug!(id = self.state.me(), ?status, "ignore replication status of an earlier leadership");
            return Ok(());
        }

        if !self.state.replication_members().contains(&status.target) {
            return Ok(());
        }

        if status.degraded {
            tracing::warn!(id = self.state.me(), target = status.target, ?status, "replication degraded");
        }

        self.membership.on_replication_status(status.target, status.match_index);
        self.replication.insert(status.target, status);

        self.drive_membership()?;
        self.report_metrics().await;
        Ok(())
    }

    /// Let the membership changer take a step while leader.
    ///
    /// A member set it proposes is enqueued as a new entry, to be appended in order with every
    /// other message.
    pub(super) fn drive_membership(&mut self) -> Result<(), RaftError> {
        if !self.state.role_state().is_leader() {
            return Ok(());
        }

        let proposal = self.membership.tick(Instant::now(), self.state.commit_index());
        self.refresh_members();

        if let Some(members) = proposal {
            tracing::info!(id = self.state.me(), ?members, "propose membership");

            let msg = RaftMsg::Message {
                message: RaftMessage::NewEntryRequest(ReplicatedContent::Membership(members)),
                enqueued_at: Instant::now(),
            };
            self.tx_api.send(msg).map_err(|_| RaftError::ShuttingDown)?;
        }
        Ok(())
    }
}
