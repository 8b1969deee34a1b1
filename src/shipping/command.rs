use crate::entry::AppData;
use crate::entry::RaftLogEntry;
use crate::LogIndex;
use crate::MemberId;
use crate::MessageSummary;
use crate::Term;

/// An instruction from the leader to its log shippers.
#[derive(Debug, Clone, PartialEq)]
pub enum ShipCommand<D: AppData> {
    /// `target` rejected an append: its log does not match at the probed index.
    Mismatch {
        target: MemberId,
        last_remote_append_index: LogIndex,
    },

    /// `target` confirmed its log matches up to `new_match_index`.
    Match { target: MemberId, new_match_index: LogIndex },

    /// The leader appended `entries` after `prev_log_index`.
    NewEntries {
        prev_log_index: LogIndex,
        prev_log_term: Option<Term>,
        entries: Vec<RaftLogEntry<D>>,
    },

    /// The leader's commit index advanced.
    CommitUpdate,
}

impl<D: AppData> MessageSummary for ShipCommand<D> {
    fn summary(&self) -> String {
        match self {
            ShipCommand::Mismatch {
                target,
                last_remote_append_index,
            } => format!("mismatch: target={}, remote_append={}", target, last_remote_append_index),
            ShipCommand::Match { target, new_match_index } => {
                format!("match: target={}, match={}", target, new_match_index)
            }
            ShipCommand::NewEntries {
                prev_log_index, entries, ..
            } => format!("new_entries: prev={}, n={}", prev_log_index, entries.len()),
            ShipCommand::CommitUpdate => "commit_update".to_string(),
        }
    }
}
