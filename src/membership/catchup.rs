use std::time::Duration;
use std::time::Instant;

use crate::LogIndex;
use crate::MemberId;

/// Rounds a joining member gets before it is given up on.
const MAX_ROUNDS: u64 = 10;

/// What a catch-up attempt looks like after an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CatchupProgress {
    InProgress,
    Achieved,
    Failed,
}

/// Tracks a joining member catching up with the leader.
///
/// A round sets the leader's commit index as the goal. A round that is finished quickly enough
/// means the member is close enough to vote. Otherwise a new round starts with a newer goal,
/// until `MAX_ROUNDS` or `catchup_timeout` is exhausted.
#[derive(Debug, Clone)]
pub(crate) struct CatchupGoalTracker {
    member: MemberId,
    round_timeout: Duration,
    catchup_timeout: Duration,

    start: Instant,
    round_start: Instant,
    round: u64,
    goal_index: LogIndex,
}

impl CatchupGoalTracker {
    pub(crate) fn new(
        member: MemberId,
        now: Instant,
        leader_commit: LogIndex,
        round_timeout: Duration,
        catchup_timeout: Duration,
    ) -> Self {
        Self {
            member,
            round_timeout,
            catchup_timeout,
            start: now,
            round_start: now,
            round: 1,
            goal_index: leader_commit,
        }
    }

    pub(crate) fn member(&self) -> MemberId {
        self.member
    }

    pub(crate) fn round(&self) -> u64 {
        self.round
    }

    pub(crate) fn goal_index(&self) -> LogIndex {
        self.goal_index
    }

    /// Evaluate with the member's current match index and the leader's commit index.
    pub(crate) fn evaluate(&mut self, now: Instant, match_index: LogIndex, leader_commit: LogIndex) -> CatchupProgress {
        if now.duration_since(self.start) > self.catchup_timeout {
            return CatchupProgress::Failed;
        }

        if match_index < self.goal_index {
            return CatchupProgress::InProgress;
        }

        if now.duration_since(self.round_start) <= self.round_timeout {
            return CatchupProgress::Achieved;
        }

        if self.round >= MAX_ROUNDS {
            return CatchupProgress::Failed;
        }

        self.round += 1;
        self.round_start = now;
        self.goal_index = leader_commit;
        CatchupProgress::InProgress
    }
}
