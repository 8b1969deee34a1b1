use std::fmt::Formatter;

use anyerror::AnyError;

use crate::LogIndex;

/// What is being operated on when a storage error occurs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorSubject {
    /// The persisted current term.
    TermState,

    /// The persisted vote.
    VoteState,

    /// The persisted membership state.
    MembershipState,

    /// A range of log entries.
    Logs,

    /// A single log entry.
    Log(LogIndex),
}

/// What it is doing when an error occurs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorVerb {
    Read,
    Write,
    Delete,
}

/// Error that occurs when operating durable state or the log.
///
/// On the write path every storage error is fatal to the local member.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// An error raised by the underlying io.
    #[error(transparent)]
    IO {
        #[from]
        source: StorageIOError,
    },

    /// The requested operation would break an invariant of the log or of the safety state.
    #[error("illegal state: {0}")]
    IllegalState(String),
}

impl StorageError {
    pub fn io(subject: ErrorSubject, verb: ErrorVerb, source: &(impl std::error::Error + 'static)) -> Self {
        StorageError::IO {
            source: StorageIOError::new(subject, verb, AnyError::new(source)),
        }
    }

    pub fn illegal_state(msg: impl ToString) -> Self {
        StorageError::IllegalState(msg.to_string())
    }
}

/// An io failure, tagged with what was being done.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct StorageIOError {
    subject: ErrorSubject,
    verb: ErrorVerb,
    source: AnyError,
}

impl std::fmt::Display for StorageIOError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "when {:?} {:?}: {}", self.verb, self.subject, self.source)
    }
}

impl StorageIOError {
    pub fn new(subject: ErrorSubject, verb: ErrorVerb, source: AnyError) -> StorageIOError {
        StorageIOError { subject, verb, source }
    }

    pub fn subject(&self) -> &ErrorSubject {
        &self.subject
    }
}
