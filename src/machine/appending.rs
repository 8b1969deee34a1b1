use crate::entry::AppData;
use crate::entry::RaftLogEntry;
use crate::entry::ReplicatedContent;
use crate::log::LogCommand;
use crate::log::ReadableRaftLog;
use crate::machine::leader;
use crate::machine::Outcome;
use crate::machine::RaftState;
use crate::messages::AppendEntriesRequest;
use crate::messages::AppendEntriesResponse;
use crate::messages::RaftMessage;
use crate::shipping::ShipCommand;
use crate::state::StorageError;
use crate::LogIndex;
use crate::MemberId;
use crate::Term;
use crate::NO_INDEX;

/// The append index of the log once the log commands already in `outcome` are applied.
pub(crate) fn pending_append_index<D: AppData>(outcome: &Outcome<D>, log: &dyn ReadableRaftLog<D>) -> LogIndex {
    let mut index = log.append_index();
    for cmd in outcome.log_commands.iter() {
        match cmd {
            LogCommand::Append { index: i, .. } => index = *i,
            LogCommand::BatchAppend { base_index, entries } => index = base_index + entries.len() as LogIndex - 1,
            LogCommand::Truncate { from_index } => index = from_index - 1,
            LogCommand::Prune { .. } => {}
        }
    }
    index
}

/// The term at `index`, looking at entries queued in `outcome` before the log.
pub(crate) fn pending_entry_term<D: AppData>(
    outcome: &Outcome<D>,
    log: &dyn ReadableRaftLog<D>,
    index: LogIndex,
) -> Result<Option<Term>, StorageError> {
    for cmd in outcome.log_commands.iter().rev() {
        match cmd {
            LogCommand::Append { index: i, entry } if *i == index => return Ok(Some(entry.term)),
            LogCommand::BatchAppend { base_index, entries }
                if index >= *base_index && index < base_index + entries.len() as LogIndex =>
            {
                return Ok(Some(entries[(index - base_index) as usize].term));
            }
            _ => {}
        }
    }
    log.read_entry_term(index)
}

/// Append new content as a leader and hand it to the log shippers.
pub(crate) fn append_new_entries<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    log: &dyn ReadableRaftLog<D>,
    contents: Vec<ReplicatedContent<D>>,
) -> Result<(), StorageError> {
    if contents.is_empty() {
        return Ok(());
    }

    let prev_log_index = pending_append_index(outcome, log);
    let prev_log_term = if prev_log_index == NO_INDEX {
        None
    } else {
        pending_entry_term(outcome, log, prev_log_index)?
    };

    let term = outcome.term;
    let entries = contents.into_iter().map(|c| RaftLogEntry::new(term, c)).collect::<Vec<_>>();

    let cmd = if entries.len() == 1 {
        LogCommand::Append {
            index: prev_log_index + 1,
            entry: entries[0].clone(),
        }
    } else {
        LogCommand::BatchAppend {
            base_index: prev_log_index + 1,
            entries: entries.clone(),
        }
    };
    outcome.add_log_command(cmd);

    outcome.add_ship_command(ShipCommand::NewEntries {
        prev_log_index,
        prev_log_term,
        entries,
    });

    leader::commit_on_quorum(state, outcome, log)
}

/// Whether our log holds the entry the leader's new entries follow.
fn log_history_matches<D: AppData>(
    log: &dyn ReadableRaftLog<D>,
    prev_log_index: LogIndex,
    prev_log_term: Option<Term>,
) -> Result<bool, StorageError> {
    if prev_log_index <= NO_INDEX {
        return Ok(true);
    }
    if prev_log_index > log.append_index() {
        return Ok(false);
    }
    let local = log.read_entry_term(prev_log_index)?;
    Ok(local.is_some() && local == prev_log_term)
}

fn respond<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    to: MemberId,
    success: bool,
    match_index: LogIndex,
    append_index: LogIndex,
) {
    outcome.send(
        to,
        RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
            from: state.me,
            term: outcome.term,
            success,
            match_index,
            append_index,
        }),
    );
}

/// Handle an append request as a follower.
///
/// Entries that conflict with the leader's are truncated, then the rest is appended. The
/// response is sent after the outcome, and therefore the append, is applied.
pub(crate) fn handle_append_entries_request<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    req: &AppendEntriesRequest<D>,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    if req.leader_term < outcome.term {
        respond(state, outcome, req.from, false, NO_INDEX, log.append_index());
        return Ok(());
    }

    outcome.set_next_term(req.leader_term);
    outcome.follow(req.from);
    outcome.leader_commit = req.leader_commit;
    outcome.renew_election_timeout = true;

    if !log_history_matches(log, req.prev_log_index, req.prev_log_term)? {
        tracing::debug!(
            id = state.me,
            prev_log_index = req.prev_log_index,
            prev_log_term = ?req.prev_log_term,
            append_index = log.append_index(),
            "log history mismatch"
        );
        respond(state, outcome, req.from, false, NO_INDEX, log.append_index());
        return Ok(());
    }

    let base_index = req.prev_log_index + 1;
    let mut offset = 0;

    while offset < req.entries.len() {
        let index = base_index + offset as LogIndex;
        if index > log.append_index() {
            break;
        }

        if index > log.prev_index() {
            let local = log.read_entry_term(index)?;
            if local != Some(req.entries[offset].term) {
                if index <= state.commit_index {
                    return Err(StorageError::illegal_state(format!(
                        "cannot truncate entry {} at or below commit index {}",
                        index, state.commit_index
                    )));
                }
                tracing::info!(
                    id = state.me,
                    index,
                    ?local,
                    leader_term = req.entries[offset].term,
                    "truncate conflicting entries"
                );
                outcome.add_log_command(LogCommand::Truncate { from_index: index });
                break;
            }
        }
        offset += 1;
    }

    if offset < req.entries.len() {
        outcome.add_log_command(LogCommand::BatchAppend {
            base_index: base_index + offset as LogIndex,
            entries: req.entries[offset..].to_vec(),
        });
    }

    let end_index = req.prev_log_index + req.entries.len() as LogIndex;
    outcome.commit_to(req.leader_commit.min(end_index));

    respond(state, outcome, req.from, true, end_index, end_index);
    Ok(())
}
