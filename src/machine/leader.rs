use crate::entry::AppData;
use crate::log::ReadableRaftLog;
use crate::machine::appending;
use crate::machine::appending::pending_append_index;
use crate::machine::appending::pending_entry_term;
use crate::machine::follower;
use crate::machine::handle_prune;
use crate::machine::heartbeat;
use crate::machine::role::RoleState;
use crate::machine::voting;
use crate::machine::Outcome;
use crate::machine::RaftState;
use crate::messages::AppendEntriesResponse;
use crate::messages::LogCompactionInfo;
use crate::messages::RaftMessage;
use crate::messages::TimeoutKind;
use crate::quorum::is_quorum_of;
use crate::quorum::quorum_match_index;
use crate::shipping::ShipCommand;
use crate::state::StorageError;

pub(crate) fn handle<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    msg: RaftMessage<D>,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    match msg {
        RaftMessage::Heartbeat(hb) => {
            if hb.leader_term >= outcome.term {
                tracing::info!(
                    id = state.me,
                    from = hb.from,
                    leader_term = hb.leader_term,
                    "heartbeat from another leader, step down"
                );
                heartbeat::handle_heartbeat(state, outcome, &hb, log)?;
            }
        }
        RaftMessage::AppendEntriesRequest(req) => {
            if req.leader_term >= outcome.term {
                tracing::info!(
                    id = state.me,
                    from = req.from,
                    leader_term = req.leader_term,
                    "append from another leader, step down"
                );
            }
            appending::handle_append_entries_request(state, outcome, &req, log)?;
        }
        RaftMessage::AppendEntriesResponse(res) => handle_append_entries_response(state, outcome, &res, log)?,
        RaftMessage::HeartbeatResponse(res) => {
            if let RoleState::Leader(l) = &mut outcome.role {
                l.heartbeat_responses.insert(res.from);
            }
        }
        RaftMessage::LogCompactionInfo(_) => {}
        RaftMessage::Timeout(TimeoutKind::Heartbeat) => heartbeat::send_heartbeats(state, outcome, log)?,
        RaftMessage::Timeout(TimeoutKind::Election) => handle_election_timeout(state, outcome),
        RaftMessage::VoteRequest(req) => {
            if req.term > outcome.term {
                outcome.step_down();
                outcome.set_next_term(req.term);
                voting::handle_vote_request(state, outcome, &req, log)?;
            } else {
                voting::deny(state, outcome, &req, false);
            }
        }
        RaftMessage::PreVoteRequest(req) => voting::deny(state, outcome, &req, true),
        RaftMessage::VoteResponse(res) | RaftMessage::PreVoteResponse(res) => {
            follower::adopt_higher_term(outcome, res.term)
        }
        RaftMessage::NewEntryRequest(content) => appending::append_new_entries(state, outcome, log, vec![content])?,
        RaftMessage::NewEntryBatchRequest(contents) => appending::append_new_entries(state, outcome, log, contents)?,
        RaftMessage::PruneRequest { prune_index } => handle_prune(state, outcome, prune_index),
    }
    Ok(())
}

/// Without hearing from a quorum during a whole election timeout, a leader may be partitioned
/// away and steps down.
fn handle_election_timeout<D: AppData>(state: &RaftState, outcome: &mut Outcome<D>) {
    let responded = match &mut outcome.role {
        RoleState::Leader(l) => std::mem::take(&mut l.heartbeat_responses),
        _ => return,
    };

    if !is_quorum_of(state.min_quorum_size, &state.voting_members, state.me, &responded) {
        tracing::warn!(
            id = state.me,
            term = outcome.term,
            responded = ?responded,
            voting = ?state.voting_members,
            "no quorum responded within an election timeout, step down"
        );
        outcome.step_down();
    }
}

fn handle_append_entries_response<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    res: &AppendEntriesResponse,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    if res.term < outcome.term {
        tracing::debug!(id = state.me, from = res.from, term = res.term, "ignore stale append response");
        return Ok(());
    }

    if res.term > outcome.term {
        tracing::info!(id = state.me, from = res.from, term = res.term, "append response of a newer term, step down");
        outcome.set_next_term(res.term);
        outcome.step_down();
        return Ok(());
    }

    let known_match = match &mut outcome.role {
        RoleState::Leader(l) => {
            l.heartbeat_responses.insert(res.from);
            match l.follower_states.get(&res.from) {
                Some(fs) => fs.match_index,
                None => {
                    tracing::debug!(id = state.me, from = res.from, "append response from a non replication member");
                    return Ok(());
                }
            }
        }
        _ => return Ok(()),
    };

    if !res.success {
        if res.append_index >= log.prev_index() {
            outcome.add_ship_command(ShipCommand::Mismatch {
                target: res.from,
                last_remote_append_index: res.append_index,
            });
        } else {
            // The follower is behind the entries we still hold.
            outcome.send(
                res.from,
                RaftMessage::LogCompactionInfo(LogCompactionInfo {
                    from: state.me,
                    leader_term: outcome.term,
                    prev_index: log.prev_index(),
                }),
            );
        }
        return Ok(());
    }

    if res.match_index < known_match {
        tracing::debug!(id = state.me, from = res.from, match_index = res.match_index, known_match, "stale match");
        return Ok(());
    }

    if res.match_index > known_match {
        if let RoleState::Leader(l) = &mut outcome.role {
            if let Some(fs) = l.follower_states.get_mut(&res.from) {
                fs.match_index = res.match_index;
            }
        }
        commit_on_quorum(state, outcome, log)?;
    }

    outcome.add_ship_command(ShipCommand::Match {
        target: res.from,
        new_match_index: res.match_index,
    });
    Ok(())
}

/// Commit the highest index a quorum of voters holds, if it was appended in the current term.
///
/// Entries of earlier terms become committed together with it.
pub(crate) fn commit_on_quorum<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    let matches = match &outcome.role {
        RoleState::Leader(l) => l.follower_states.iter().map(|(id, fs)| (*id, fs.match_index)).collect(),
        _ => return Ok(()),
    };

    let my_append_index = pending_append_index(outcome, log);
    let quorum_index = match quorum_match_index(
        state.min_quorum_size,
        &state.voting_members,
        state.me,
        my_append_index,
        &matches,
    ) {
        Some(x) => x,
        None => return Ok(()),
    };

    if quorum_index <= outcome.commit_index {
        return Ok(());
    }

    if pending_entry_term(outcome, log, quorum_index)? != Some(outcome.term) {
        tracing::debug!(id = state.me, quorum_index, "quorum index is not of the current term, not committed yet");
        return Ok(());
    }

    tracing::debug!(id = state.me, from = outcome.commit_index, to = quorum_index, "commit");
    outcome.commit_to(quorum_index);
    outcome.leader_commit = quorum_index;
    outcome.add_ship_command(ShipCommand::CommitUpdate);
    Ok(())
}
