use crate::entry::AppData;
use crate::log::ReadableRaftLog;
use crate::machine::appending;
use crate::machine::election;
use crate::machine::follower;
use crate::machine::handle_prune;
use crate::machine::heartbeat;
use crate::machine::role::RoleState;
use crate::machine::voting;
use crate::machine::Outcome;
use crate::machine::RaftState;
use crate::messages::RaftMessage;
use crate::messages::TimeoutKind;
use crate::messages::VoteResponse;
use crate::quorum::is_quorum_of;
use crate::state::StorageError;

pub(crate) fn handle<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    msg: RaftMessage<D>,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    match msg {
        RaftMessage::Heartbeat(hb) => heartbeat::handle_heartbeat(state, outcome, &hb, log)?,
        RaftMessage::AppendEntriesRequest(req) => appending::handle_append_entries_request(state, outcome, &req, log)?,
        RaftMessage::LogCompactionInfo(info) => follower::handle_log_compaction_info(state, outcome, &info, log),
        RaftMessage::VoteResponse(res) => handle_vote_response(state, outcome, &res, log)?,
        RaftMessage::VoteRequest(req) => {
            if req.term > outcome.term {
                outcome.set_next_term(req.term);
                outcome.step_down();
            }
            voting::handle_vote_request(state, outcome, &req, log)?;
        }
        RaftMessage::PreVoteRequest(req) => voting::deny(state, outcome, &req, true),
        RaftMessage::PreVoteResponse(res) => follower::adopt_higher_term(outcome, res.term),
        RaftMessage::AppendEntriesResponse(res) => follower::adopt_higher_term(outcome, res.term),
        RaftMessage::HeartbeatResponse(_) => {}
        RaftMessage::Timeout(TimeoutKind::Election) => {
            tracing::info!(id = state.me, term = state.term(), "failed to get elected, start a new election");
            if !election::start_real_election(state, outcome, log)? {
                outcome.step_down();
            }
        }
        RaftMessage::Timeout(TimeoutKind::Heartbeat) => {}
        RaftMessage::NewEntryRequest(_) | RaftMessage::NewEntryBatchRequest(_) => {
            tracing::debug!(id = state.me, "candidate, ignore new entry");
        }
        RaftMessage::PruneRequest { prune_index } => handle_prune(state, outcome, prune_index),
    }
    Ok(())
}

/// Count a vote. Only a granted vote of the current term counts.
fn handle_vote_response<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    res: &VoteResponse,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    if res.term > outcome.term {
        outcome.set_next_term(res.term);
        outcome.step_down();
        return Ok(());
    }

    if res.term < outcome.term || !res.vote_granted {
        tracing::debug!(id = state.me, from = res.from, term = res.term, "vote not counted");
        return Ok(());
    }

    let reached = match &mut outcome.role {
        RoleState::Candidate(c) => {
            c.votes.insert(res.from);
            is_quorum_of(state.min_quorum_size, &state.voting_members, state.me, &c.votes)
        }
        _ => false,
    };

    if reached {
        election::become_leader(state, outcome, log)?;
    }
    Ok(())
}
