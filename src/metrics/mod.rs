//! Raft metrics for observability.
//!
//! Metrics are published after every handled message on a `tokio::sync::watch` channel, see
//! `Raft::metrics()`. `Wait` builds on it to wait for a member to reach some state.

mod wait;

#[cfg(test)]
mod wait_test;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

pub use self::wait::Wait;
pub use self::wait::WaitError;
use crate::machine::RaftState;
use crate::machine::Role;
use crate::shipping::ReplicationStatus;
use crate::LogIndex;
use crate::MemberId;
use crate::MessageSummary;
use crate::Term;
use crate::NO_INDEX;

/// The role of a member as seen from outside, including a stopped member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Follower,
    Candidate,
    Leader,

    /// The raft task has stopped, either by `Raft::shutdown()` or by a fatal storage error.
    Shutdown,
}

impl From<Role> for ServerState {
    fn from(r: Role) -> Self {
        match r {
            Role::Follower => ServerState::Follower,
            Role::Candidate => ServerState::Candidate,
            Role::Leader => ServerState::Leader,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A set of metrics describing the current state of a raft member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftMetrics {
    pub id: MemberId,
    pub state: ServerState,

    /// A follower that lost its leader and is asking for pre-votes.
    pub pre_election: bool,

    pub current_term: Term,
    pub voted_for: Option<MemberId>,
    pub current_leader: Option<MemberId>,

    pub commit_index: LogIndex,

    /// The index of the last entry in the log.
    pub append_index: LogIndex,

    /// The index right before the first entry in the log.
    pub prev_index: LogIndex,

    pub voting_members: BTreeSet<MemberId>,
    pub replication_members: BTreeSet<MemberId>,

    /// The leader no longer has the entries this member needs: a snapshot must be installed.
    pub needs_fresh_snapshot: bool,

    /// Status of every log shipper, only on a leader.
    pub replication: Option<BTreeMap<MemberId, ReplicationStatus>>,
}

impl RaftMetrics {
    pub(crate) fn new_initial(id: MemberId) -> Self {
        Self {
            id,
            state: ServerState::Follower,
            pre_election: false,
            current_term: 0,
            voted_for: None,
            current_leader: None,
            commit_index: NO_INDEX,
            append_index: NO_INDEX,
            prev_index: NO_INDEX,
            voting_members: BTreeSet::new(),
            replication_members: BTreeSet::new(),
            needs_fresh_snapshot: false,
            replication: None,
        }
    }

    pub(crate) fn from_state(
        state: &RaftState,
        append_index: LogIndex,
        prev_index: LogIndex,
        replication: Option<BTreeMap<MemberId, ReplicationStatus>>,
    ) -> Self {
        Self {
            id: state.me(),
            state: state.role().into(),
            pre_election: state.role_state().is_pre_election(),
            current_term: state.term(),
            voted_for: state.voted_for(),
            current_leader: state.leader(),
            commit_index: state.commit_index(),
            append_index,
            prev_index,
            voting_members: state.voting_members().clone(),
            replication_members: state.replication_members().clone(),
            needs_fresh_snapshot: state.needs_fresh_snapshot(),
            replication,
        }
    }
}

impl MessageSummary for RaftMetrics {
    fn summary(&self) -> String {
        format!(
            "Metrics{{id:{},{}, term:{}, leader:{:?}, commit:{}, log:{}..={}, voting:{:?}, replication:{:?}}}",
            self.id,
            self.state,
            self.current_term,
            self.current_leader,
            self.commit_index,
            self.prev_index,
            self.append_index,
            self.voting_members,
            self.replication_members,
        )
    }
}
