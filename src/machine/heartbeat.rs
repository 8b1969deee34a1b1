use crate::entry::AppData;
use crate::log::ReadableRaftLog;
use crate::machine::appending::pending_entry_term;
use crate::machine::Outcome;
use crate::machine::RaftState;
use crate::messages::Heartbeat;
use crate::messages::HeartbeatResponse;
use crate::messages::RaftMessage;
use crate::state::StorageError;
use crate::NO_INDEX;

/// Send a heartbeat carrying the commit index to every replication target.
pub(crate) fn send_heartbeats<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    let commit_index = outcome.commit_index;
    let commit_index_term = if commit_index == NO_INDEX {
        None
    } else {
        pending_entry_term(outcome, log, commit_index)?
    };

    let hb = Heartbeat {
        from: state.me,
        leader_term: outcome.term,
        commit_index,
        commit_index_term,
    };

    for target in state.replication_targets() {
        outcome.send(target, RaftMessage::Heartbeat(hb.clone()));
    }
    Ok(())
}

/// Handle a heartbeat as a follower.
///
/// The leader's commit index is taken over only if our entry at that index is the leader's.
pub(crate) fn handle_heartbeat<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    hb: &Heartbeat,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    if hb.leader_term < outcome.term {
        return Ok(());
    }

    outcome.set_next_term(hb.leader_term);
    outcome.follow(hb.from);
    outcome.leader_commit = hb.commit_index;
    outcome.renew_election_timeout = true;

    if hb.commit_index > outcome.commit_index {
        let local = log.read_entry_term(hb.commit_index)?;
        if local.is_some() && local == hb.commit_index_term {
            outcome.commit_to(hb.commit_index);
        }
    }

    outcome.send(hb.from, RaftMessage::HeartbeatResponse(HeartbeatResponse { from: state.me }));
    Ok(())
}
