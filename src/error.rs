//! Error types exposed by this crate.

use crate::state::StorageError;
use crate::LogIndex;
use crate::MemberId;
use crate::Term;

/// A result type where the error variant is always a `RaftError`.
pub type RaftResult<T> = std::result::Result<T, RaftError>;

/// Errors that stop a raft member.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RaftError {
    /// Writing the log or the safety state failed. The member stopped to avoid diverging.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The raft task has stopped or is stopping.
    #[error("raft is shutting down")]
    ShuttingDown,
}

/// No leader is known to this member.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no leader found for member {me} in term {term}")]
pub struct NoLeaderFoundError {
    pub me: MemberId,
    pub term: Term,
}

/// An error related to a client write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientWriteError {
    #[error(transparent)]
    RaftError(#[from] RaftError),

    /// Only the leader appends client writes. The id of the leader is returned if known.
    #[error("this member is not the leader, forward to: {0:?}")]
    ForwardToLeader(Option<MemberId>),
}

/// An error related to bootstrapping a brand-new cluster.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    RaftError(#[from] RaftError),

    /// Only a member with an empty log can bootstrap a cluster.
    #[error("can not bootstrap: log is not empty, append index: {append_index}")]
    NotEmpty { append_index: LogIndex },

    #[error("can not bootstrap with an empty member set")]
    EmptyMembers,
}
