use crate::entry::AppData;
use crate::entry::ReplicatedContent;
use crate::log::ReadableRaftLog;
use crate::machine::appending;
use crate::machine::heartbeat;
use crate::machine::role::CandidateRole;
use crate::machine::role::FollowerRole;
use crate::machine::role::FollowerState;
use crate::machine::role::LeaderRole;
use crate::machine::role::RoleState;
use crate::machine::voting::last_log_position;
use crate::machine::Outcome;
use crate::machine::RaftState;
use crate::messages::RaftMessage;
use crate::messages::VoteRequest;
use crate::quorum::is_quorum;
use crate::state::StorageError;

/// Start an election for the next term: vote for ourselves and ask every other voter.
///
/// Returns false if this member is not a voter and can not run.
pub(crate) fn start_real_election<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    log: &dyn ReadableRaftLog<D>,
) -> Result<bool, StorageError> {
    if !state.voting_members.contains(&state.me) {
        tracing::info!(id = state.me, voting = ?state.voting_members, "not a voting member, can not start election");
        return Ok(false);
    }

    outcome.set_next_term(state.term() + 1);
    outcome.voted_for = Some(state.me);
    outcome.role = RoleState::Candidate(CandidateRole::default());
    outcome.leader = None;

    let last = last_log_position(log)?;
    let req = VoteRequest {
        from: state.me,
        term: outcome.term,
        candidate: state.me,
        last_log_index: last.index,
        last_log_term: last.term,
    };

    for target in state.voting_targets() {
        outcome.send(target, RaftMessage::VoteRequest(req.clone()));
    }

    tracing::info!(id = state.me, term = outcome.term, voting = ?state.voting_members, "election started");

    if is_quorum(state.min_quorum_size, state.voting_members.len(), 0) {
        become_leader(state, outcome, log)?;
    }
    Ok(true)
}

/// Ask every other voter whether we could win an election for the next term, without changing
/// our own term or vote.
pub(crate) fn start_pre_election<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    log: &dyn ReadableRaftLog<D>,
) -> Result<bool, StorageError> {
    if !state.voting_members.contains(&state.me) {
        return Ok(false);
    }

    outcome.role = RoleState::Follower(FollowerRole {
        pre_election: true,
        pre_votes: Default::default(),
    });
    outcome.leader = None;

    let last = last_log_position(log)?;
    let req = VoteRequest {
        from: state.me,
        term: outcome.term + 1,
        candidate: state.me,
        last_log_index: last.index,
        last_log_term: last.term,
    };

    for target in state.voting_targets() {
        outcome.send(target, RaftMessage::PreVoteRequest(req.clone()));
    }

    tracing::info!(id = state.me, term = outcome.term, "pre-election started");

    if is_quorum(state.min_quorum_size, state.voting_members.len(), 0) {
        start_real_election(state, outcome, log)?;
    }
    Ok(true)
}

/// Take over as leader of `outcome.term`.
///
/// A `NewLeaderBarrier` is appended so that entries of earlier terms get committed with it, and
/// every follower is told at once.
pub(crate) fn become_leader<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    let follower_states = state.replication_targets().map(|id| (id, FollowerState::default())).collect();

    outcome.role = RoleState::Leader(LeaderRole {
        follower_states,
        heartbeat_responses: Default::default(),
        last_log_index_before_we_became_leader: log.append_index(),
    });
    outcome.leader = Some(state.me);
    outcome.elected_leader = true;
    outcome.renew_election_timeout = true;

    appending::append_new_entries(state, outcome, log, vec![ReplicatedContent::NewLeaderBarrier])?;
    heartbeat::send_heartbeats(state, outcome, log)?;

    tracing::info!(id = state.me, term = outcome.term, "became leader");
    Ok(())
}
