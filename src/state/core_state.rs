use serde::Deserialize;
use serde::Serialize;

use crate::state::MembershipEntry;
use crate::state::TermState;
use crate::state::VoteState;
use crate::LogIndex;
use crate::Term;

/// Everything a member needs to join a cluster from scratch, except the entries after
/// `prev_index`.
///
/// It is produced from a caught-up member's state, or built for bootstrapping, and installed with
/// `Raft::install_core_state()`. The log is fast-forwarded to start right after `prev_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftCoreState {
    pub membership: MembershipEntry,
    pub term: TermState,
    pub vote: VoteState,

    /// Index of the last entry covered by the state this package was taken with.
    pub prev_index: LogIndex,

    /// Term of the entry at `prev_index`.
    pub prev_term: Term,
}

impl RaftCoreState {
    pub fn new(membership: MembershipEntry) -> Self {
        Self {
            membership,
            term: TermState::default(),
            vote: VoteState::default(),
            prev_index: crate::NO_INDEX,
            prev_term: 0,
        }
    }
}
