use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::metrics::RaftMetrics;
use crate::metrics::ServerState;
use crate::LogIndex;
use crate::MemberId;
use crate::MessageSummary;

/// Errors of waiting on metrics.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timeout after {0:?} when {1}")]
    Timeout(Duration, String),

    #[error("raft is shutting down")]
    ShuttingDown,
}

/// Waits on the metrics channel of a member until its metrics satisfy a condition.
pub struct Wait {
    pub timeout: Duration,
    pub rx: watch::Receiver<RaftMetrics>,
}

impl Wait {
    /// Wait until `func` holds for the latest metrics, and return them.
    ///
    /// Fails with `WaitError::Timeout` once `self.timeout` has passed, or with
    /// `WaitError::ShuttingDown` when the raft task is gone before `func` holds.
    #[tracing::instrument(level = "trace", skip(self, func), fields(msg=%msg.to_string()))]
    pub async fn metrics<T>(&self, func: T, msg: impl ToString) -> Result<RaftMetrics, WaitError>
    where T: Fn(&RaftMetrics) -> bool + Send {
        let msg = msg.to_string();
        let deadline = Instant::now() + self.timeout;
        let mut rx = self.rx.clone();

        loop {
            let latest = rx.borrow_and_update().clone();
            if func(&latest) {
                tracing::debug!(id = latest.id, %msg, latest = %latest.summary(), "wait satisfied");
                return Ok(latest);
            }

            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_closed)) => {
                    tracing::debug!(id = latest.id, %msg, latest = %latest.summary(), "metrics closed while waiting");
                    return Err(WaitError::ShuttingDown);
                }
                Err(_elapsed) => {
                    tracing::debug!(id = latest.id, %msg, latest = %latest.summary(), "wait timeout");
                    return Err(WaitError::Timeout(self.timeout, format!("{} latest: {}", msg, latest.summary())));
                }
            }
        }
    }

    /// Wait for `current_leader` to become `Some(leader_id)` until timeout.
    #[tracing::instrument(level = "trace", skip(self), fields(msg=msg.to_string().as_str()))]
    pub async fn leader(&self, leader_id: MemberId, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| x.current_leader == Some(leader_id),
            &format!("{} .current_leader -> {}", msg.to_string(), leader_id),
        )
        .await
    }

    /// Wait for `state` to become `want_state` or timeout.
    #[tracing::instrument(level = "trace", skip(self), fields(msg=msg.to_string().as_str()))]
    pub async fn state(&self, want_state: ServerState, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| x.state == want_state,
            &format!("{} .state -> {:?}", msg.to_string(), want_state),
        )
        .await
    }

    /// Wait until the log ends exactly at `want_append_index`.
    #[tracing::instrument(level = "trace", skip(self), fields(msg=msg.to_string().as_str()))]
    pub async fn log(&self, want_append_index: LogIndex, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| x.append_index == want_append_index,
            &format!("{} .append_index -> {}", msg.to_string(), want_append_index),
        )
        .await
    }

    /// Wait until the commit index reaches at least `want_commit_index`.
    #[tracing::instrument(level = "trace", skip(self), fields(msg=msg.to_string().as_str()))]
    pub async fn commit(&self, want_commit_index: LogIndex, msg: impl ToString) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| x.commit_index >= want_commit_index,
            &format!("{} .commit_index >= {}", msg.to_string(), want_commit_index),
        )
        .await
    }

    /// Wait for the voting members to become `want_members`.
    #[tracing::instrument(level = "trace", skip(self), fields(msg=msg.to_string().as_str()))]
    pub async fn members(
        &self,
        want_members: BTreeSet<MemberId>,
        msg: impl ToString,
    ) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |x| x.voting_members == want_members,
            &format!("{} .voting_members -> {:?}", msg.to_string(), want_members),
        )
        .await
    }
}
