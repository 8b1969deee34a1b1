use crate::entry::AppData;
use crate::log::ReadableRaftLog;
use crate::machine::Outcome;
use crate::machine::RaftState;
use crate::messages::RaftMessage;
use crate::messages::VoteRequest;
use crate::messages::VoteResponse;
use crate::state::StorageError;
use crate::LogPosition;

/// The term and index of the last entry in the log. An empty log is at `0--1`.
pub(crate) fn last_log_position<D: AppData>(log: &dyn ReadableRaftLog<D>) -> Result<LogPosition, StorageError> {
    let index = log.append_index();
    let term = log.read_entry_term(index)?.unwrap_or_default();
    Ok(LogPosition { term, index })
}

/// Whether a candidate's log is at least as up to date as ours.
fn candidate_log_up_to_date<D: AppData>(log: &dyn ReadableRaftLog<D>, req: &VoteRequest) -> Result<bool, StorageError> {
    let mine = last_log_position(log)?;
    let theirs = LogPosition {
        term: req.last_log_term,
        index: req.last_log_index,
    };
    Ok(theirs >= mine)
}

/// Decide on a vote request.
///
/// The caller has already moved `outcome` to a higher request term, if any.
pub(crate) fn handle_vote_request<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    req: &VoteRequest,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    let term_ok = req.term >= outcome.term;
    let not_voted_for_other = outcome.voted_for.map_or(true, |x| x == req.candidate);
    let up_to_date = candidate_log_up_to_date(log, req)?;

    let granted = term_ok && not_voted_for_other && up_to_date;
    if granted {
        outcome.voted_for = Some(req.candidate);
        outcome.renew_election_timeout = true;
    }

    tracing::debug!(
        id = state.me,
        candidate = req.candidate,
        granted,
        term_ok,
        not_voted_for_other,
        up_to_date,
        "vote request"
    );

    outcome.send(
        req.from,
        RaftMessage::VoteResponse(VoteResponse {
            from: state.me,
            term: outcome.term,
            vote_granted: granted,
        }),
    );
    Ok(())
}

/// Decide on a pre-vote request. Nothing but the response changes.
///
/// A pre-vote is granted only by a member that lost its leader too, for a prospective term no
/// older than its own, to a candidate whose log is up to date.
pub(crate) fn handle_pre_vote_request<D: AppData>(
    state: &RaftState,
    outcome: &mut Outcome<D>,
    req: &VoteRequest,
    log: &dyn ReadableRaftLog<D>,
) -> Result<(), StorageError> {
    let granted = state.supports_pre_voting
        && outcome.role.is_pre_election()
        && req.term >= outcome.term
        && candidate_log_up_to_date(log, req)?;

    tracing::debug!(id = state.me, candidate = req.candidate, granted, "pre-vote request");

    outcome.send(
        req.from,
        RaftMessage::PreVoteResponse(VoteResponse {
            from: state.me,
            term: outcome.term,
            vote_granted: granted,
        }),
    );
    Ok(())
}

/// Deny a vote or pre-vote request without considering it.
pub(crate) fn deny<D: AppData>(state: &RaftState, outcome: &mut Outcome<D>, req: &VoteRequest, pre_vote: bool) {
    let resp = VoteResponse {
        from: state.me,
        term: outcome.term,
        vote_granted: false,
    };
    let msg = if pre_vote {
        RaftMessage::PreVoteResponse(resp)
    } else {
        RaftMessage::VoteResponse(resp)
    };
    outcome.send(req.from, msg);
}
