use std::fmt::Display;
use std::fmt::Formatter;

use serde::Deserialize;
use serde::Serialize;

/// The id of a cluster member.
pub type MemberId = u64;

/// A raft term. Never decreases on a member.
pub type Term = u64;

/// A 0-based position in the raft log.
///
/// `-1` denotes "no entry", e.g. the append index of an empty log.
pub type LogIndex = i64;

/// The log index value that denotes "no entry".
pub const NO_INDEX: LogIndex = -1;

/// The position of a log entry: the term it was created in and its index.
#[derive(Debug, Default, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub term: Term,
    pub index: LogIndex,
}

impl From<(Term, LogIndex)> for LogPosition {
    fn from(v: (Term, LogIndex)) -> Self {
        LogPosition { term: v.0, index: v.1 }
    }
}

impl Display for LogPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.term, self.index)
    }
}

/// A short, single line description of a message, for logging.
pub trait MessageSummary {
    fn summary(&self) -> String;
}

impl<T: MessageSummary> MessageSummary for Option<T> {
    fn summary(&self) -> String {
        match self {
            None => "None".to_string(),
            Some(x) => format!("Some({})", x.summary()),
        }
    }
}
