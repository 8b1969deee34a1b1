use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::LogIndex;
use crate::MemberId;
use crate::NO_INDEX;

/// The role of a member, without role specific state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What a leader knows about one follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowerState {
    pub match_index: LogIndex,
}

impl Default for FollowerState {
    fn default() -> Self {
        Self { match_index: NO_INDEX }
    }
}

pub type FollowerStates = BTreeMap<MemberId, FollowerState>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowerRole {
    /// Set after the election timer fired while pre-voting is enabled: the member lost its
    /// leader and is asking peers whether it could win.
    pub pre_election: bool,
    pub pre_votes: BTreeSet<MemberId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateRole {
    /// Members other than this one that granted their vote in the current term.
    pub votes: BTreeSet<MemberId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderRole {
    pub follower_states: FollowerStates,

    /// Members that responded since the last election timeout.
    pub heartbeat_responses: BTreeSet<MemberId>,

    pub last_log_index_before_we_became_leader: LogIndex,
}

/// A role together with the state only that role needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleState {
    Follower(FollowerRole),
    Candidate(CandidateRole),
    Leader(LeaderRole),
}

impl Default for RoleState {
    fn default() -> Self {
        RoleState::Follower(FollowerRole::default())
    }
}

impl RoleState {
    pub fn role(&self) -> Role {
        match self {
            RoleState::Follower(_) => Role::Follower,
            RoleState::Candidate(_) => Role::Candidate,
            RoleState::Leader(_) => Role::Leader,
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, RoleState::Leader(_))
    }

    pub fn is_pre_election(&self) -> bool {
        matches!(self, RoleState::Follower(FollowerRole { pre_election: true, .. }))
    }

    pub fn follower_states(&self) -> Option<&FollowerStates> {
        match self {
            RoleState::Leader(l) => Some(&l.follower_states),
            _ => None,
        }
    }
}
