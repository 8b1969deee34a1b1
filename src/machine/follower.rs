use crate::entry::AppData;
use crate::log::ReadableRaftLog;
use crate::machine::appending;
use crate::machine::election;
use crate::machine::handle_prune;
use crate::machine::heartbeat;
use crate::machine::role::FollowerRole;
use crate::machine::role::RoleState;
use crate::machine::voting;
use crate::machine::Outcome;
use crate::machine::RaftState;
use crate::messages::LogCompactionInfo;
use crate::messages::RaftMessage;
use crate::messages::TimeoutKind;
use crate::messages::VoteResponse;
use crate::quorum::is_quorum_of;
use crate::state::StorageError;
use crate::Term;

pub(crate) fn handle<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    msg: RaftMessage<D>,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    match msg {
        RaftMessage::Heartbeat(hb) => heartbeat::handle_heartbeat(state, outcome, &hb, log)?,
        RaftMessage::AppendEntriesRequest(req) => appending::handle_append_entries_request(state, outcome, &req, log)?,
        RaftMessage::LogCompactionInfo(info) => handle_log_compaction_info(state, outcome, &info, log),
        RaftMessage::VoteRequest(req) => {
            if req.term > outcome.term {
                outcome.set_next_term(req.term);
                outcome.step_down();
            }
            voting::handle_vote_request(state, outcome, &req, log)?;
        }
        RaftMessage::PreVoteRequest(req) => voting::handle_pre_vote_request(state, outcome, &req, log)?,
        RaftMessage::PreVoteResponse(res) => handle_pre_vote_response(state, outcome, &res, log)?,
        RaftMessage::VoteResponse(VoteResponse { term, .. }) => adopt_higher_term(outcome, term),
        RaftMessage::AppendEntriesResponse(res) => adopt_higher_term(outcome, res.term),
        RaftMessage::HeartbeatResponse(_) => {}
        RaftMessage::Timeout(TimeoutKind::Election) => handle_election_timeout(state, outcome, log)?,
        RaftMessage::Timeout(TimeoutKind::Heartbeat) => {}
        RaftMessage::NewEntryRequest(_) | RaftMessage::NewEntryBatchRequest(_) => {
            tracing::debug!(id = state.me, leader = ?state.leader, "not leader, ignore new entry");
        }
        RaftMessage::PruneRequest { prune_index } => handle_prune(state, outcome, prune_index),
    }
    Ok(())
}

/// Any message of a newer term moves us to that term, without a leader.
pub(crate) fn adopt_higher_term<D: AppData>(outcome: &mut Outcome<D>, term: Term) {
    if term > outcome.term {
        outcome.set_next_term(term);
        outcome.step_down();
    }
}

pub(crate) fn handle_log_compaction_info<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    info: &LogCompactionInfo,
    log: &dyn ReadableRaftLog<D>,
) {
    if info.leader_term < outcome.term {
        return;
    }

    if info.prev_index > log.append_index() {
        tracing::warn!(
            id = state.me,
            leader_prev_index = info.prev_index,
            append_index = log.append_index(),
            "leader pruned entries this member needs, a fresh snapshot is required"
        );
        outcome.needs_fresh_snapshot = true;
    }
}

fn handle_election_timeout<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    if state.refuse_to_be_leader {
        tracing::debug!(id = state.me, "election timeout, refusing to be leader");
        if state.supports_pre_voting {
            outcome.set_pre_election(true);
            outcome.leader = None;
        }
        return Ok(());
    }

    let started = if state.supports_pre_voting {
        election::start_pre_election(state, outcome, log)?
    } else {
        election::start_real_election(state, outcome, log)?
    };

    if !started {
        tracing::debug!(id = state.me, "election timeout, but can not start an election");
    }
    Ok(())
}

fn handle_pre_vote_response<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    res: &VoteResponse,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    if res.term > outcome.term {
        let was_pre_election = outcome.role.is_pre_election();
        outcome.set_next_term(res.term);
        outcome.role = RoleState::Follower(FollowerRole {
            pre_election: was_pre_election,
            pre_votes: Default::default(),
        });
        outcome.leader = None;
        return Ok(());
    }

    if res.term < outcome.term {
        tracing::debug!(id = state.me, from = res.from, term = res.term, "ignore pre-vote response of an earlier term");
        return Ok(());
    }

    if !res.vote_granted {
        return Ok(());
    }

    let reached = match &mut outcome.role {
        RoleState::Follower(f) if f.pre_election => {
            f.pre_votes.insert(res.from);
            is_quorum_of(state.min_quorum_size, &state.voting_members, state.me, &f.pre_votes)
        }
        _ => return Ok(()),
    };

    if reached {
        tracing::info!(id = state.me, "pre-election won, start real election");
        election::start_real_election(state, outcome, log)?;
    }
    Ok(())
}
