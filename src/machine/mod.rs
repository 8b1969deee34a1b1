//! The raft machine: a pure function from the current state and one message to an [`Outcome`].
//!
//! Handling a message reads the state and the log but changes neither. The returned outcome is
//! applied with [`RaftState::update`], and its side effects are carried out by the runtime.

mod appending;
mod candidate;
mod election;
mod follower;
mod heartbeat;
mod leader;
mod outcome;
mod role;
mod state;
mod voting;

#[cfg(test)]
pub(crate) mod testing;


pub use outcome::Outcome;
pub use role::CandidateRole;
pub use role::FollowerRole;
pub use role::FollowerState;
pub use role::FollowerStates;
pub use role::LeaderRole;
pub use role::Role;
pub use role::RoleState;
pub use state::RaftState;

use crate::entry::AppData;
use crate::log::LogCommand;
use crate::log::ReadableRaftLog;
use crate::messages::RaftMessage;
use crate::state::StorageError;
use crate::LogIndex;
use crate::MessageSummary;
use crate::NO_INDEX;

/// Decide what to do with `msg`, according to the current role.
#[tracing::instrument(level = "trace", skip(state, log, msg), fields(id = state.me(), msg = %msg.summary()))]
pub fn handle<D: AppData>(
    state: &RaftState,
    log: &dyn ReadableRaftLog<D>,
    msg: RaftMessage<D>,
) -> Result<Outcome<D>, StorageError> {
    let mut outcome = Outcome::new(state);

    match state.role() {
        Role::Follower => follower::handle(state, &mut outcome, msg, log)?,
        Role::Candidate => candidate::handle(state, &mut outcome, msg, log)?,
        Role::Leader => leader::handle(state, &mut outcome, msg, log)?,
    }

    tracing::trace!(outcome = %outcome.summary(), "handled");
    Ok(outcome)
}

/// Entries are pruned only once committed, whatever the role.
pub(crate) fn handle_prune<D: AppData>(state: &RaftState, outcome: &mut Outcome<D>, prune_index: LogIndex) {
    let safe = prune_index.min(state.commit_index);
    if safe > NO_INDEX {
        outcome.add_log_command(LogCommand::Prune { prune_index: safe });
    }
}
