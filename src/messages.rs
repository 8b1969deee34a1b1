//! Messages the raft machine handles and sends.

use serde::Deserialize;
use serde::Serialize;

use crate::entry::AppData;
use crate::entry::RaftLogEntry;
use crate::entry::ReplicatedContent;
use crate::LogIndex;
use crate::MemberId;
use crate::MessageSummary;
use crate::Term;

/// Asks for a vote, or for a pre-vote when sent as `RaftMessage::PreVoteRequest`.
///
/// For a pre-vote `term` is the term the candidate would start if it won.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub from: MemberId,
    pub term: Term,
    pub candidate: MemberId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub from: MemberId,
    pub term: Term,
    pub vote_granted: bool,
}

/// Replicates entries after `prev_log_index`. With no entries it probes for a match or carries a
/// new commit index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "D: AppData")]
pub struct AppendEntriesRequest<D: AppData> {
    pub from: MemberId,
    pub leader_term: Term,

    /// `-1` when the entries start the log.
    pub prev_log_index: LogIndex,

    /// `None` iff `prev_log_index` is `-1`.
    pub prev_log_term: Option<Term>,

    pub entries: Vec<RaftLogEntry<D>>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub from: MemberId,
    pub term: Term,
    pub success: bool,

    /// The highest index known to match the leader's log, `-1` if unknown.
    pub match_index: LogIndex,

    /// The responder's append index.
    pub append_index: LogIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub from: MemberId,
    pub leader_term: Term,
    pub commit_index: LogIndex,

    /// The term of the entry at `commit_index` on the leader.
    pub commit_index_term: Option<Term>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub from: MemberId,
}

/// Tells a follower that the leader's log no longer holds the entries it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCompactionInfo {
    pub from: MemberId,
    pub leader_term: Term,
    pub prev_index: LogIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutKind {
    Election,
    Heartbeat,
}

/// Every input of the raft machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "D: AppData")]
pub enum RaftMessage<D: AppData> {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    PreVoteRequest(VoteRequest),
    PreVoteResponse(VoteResponse),
    AppendEntriesRequest(AppendEntriesRequest<D>),
    AppendEntriesResponse(AppendEntriesResponse),
    Heartbeat(Heartbeat),
    HeartbeatResponse(HeartbeatResponse),
    LogCompactionInfo(LogCompactionInfo),
    Timeout(TimeoutKind),

    /// A client write. Only a leader appends it.
    NewEntryRequest(ReplicatedContent<D>),

    /// Several client writes, appended together.
    NewEntryBatchRequest(Vec<ReplicatedContent<D>>),

    /// Allow the log to discard entries up to `prune_index`.
    PruneRequest { prune_index: LogIndex },
}

impl<D: AppData> RaftMessage<D> {
    /// The sender, for messages that come from another member.
    pub fn from(&self) -> Option<MemberId> {
        match self {
            RaftMessage::VoteRequest(x) | RaftMessage::PreVoteRequest(x) => Some(x.from),
            RaftMessage::VoteResponse(x) | RaftMessage::PreVoteResponse(x) => Some(x.from),
            RaftMessage::AppendEntriesRequest(x) => Some(x.from),
            RaftMessage::AppendEntriesResponse(x) => Some(x.from),
            RaftMessage::Heartbeat(x) => Some(x.from),
            RaftMessage::HeartbeatResponse(x) => Some(x.from),
            RaftMessage::LogCompactionInfo(x) => Some(x.from),
            RaftMessage::Timeout(_)
            | RaftMessage::NewEntryRequest(_)
            | RaftMessage::NewEntryBatchRequest(_)
            | RaftMessage::PruneRequest { .. } => None,
        }
    }

    /// A stable name of the message type, for monitoring.
    pub fn kind(&self) -> &'static str {
        match self {
            RaftMessage::VoteRequest(_) => "vote_request",
            RaftMessage::VoteResponse(_) => "vote_response",
            RaftMessage::PreVoteRequest(_) => "pre_vote_request",
            RaftMessage::PreVoteResponse(_) => "pre_vote_response",
            RaftMessage::AppendEntriesRequest(_) => "append_entries_request",
            RaftMessage::AppendEntriesResponse(_) => "append_entries_response",
            RaftMessage::Heartbeat(_) => "heartbeat",
            RaftMessage::HeartbeatResponse(_) => "heartbeat_response",
            RaftMessage::LogCompactionInfo(_) => "log_compaction_info",
            RaftMessage::Timeout(TimeoutKind::Election) => "election_timeout",
            RaftMessage::Timeout(TimeoutKind::Heartbeat) => "heartbeat_timeout",
            RaftMessage::NewEntryRequest(_) => "new_entry_request",
            RaftMessage::NewEntryBatchRequest(_) => "new_entry_batch_request",
            RaftMessage::PruneRequest { .. } => "prune_request",
        }
    }
}

impl<D: AppData> MessageSummary for RaftMessage<D> {
    fn summary(&self) -> String {
        match self {
            RaftMessage::VoteRequest(x) | RaftMessage::PreVoteRequest(x) => format!(
                "{}: from={}, term={}, last_log={}-{}",
                self.kind(),
                x.from,
                x.term,
                x.last_log_term,
                x.last_log_index
            ),
            RaftMessage::VoteResponse(x) | RaftMessage::PreVoteResponse(x) => format!(
                "{}: from={}, term={}, granted={}",
                self.kind(),
                x.from,
                x.term,
                x.vote_granted
            ),
            RaftMessage::AppendEntriesRequest(x) => format!(
                "append_entries_request: from={}, term={}, prev={:?}-{}, commit={}, n={}",
                x.from,
                x.leader_term,
                x.prev_log_term,
                x.prev_log_index,
                x.leader_commit,
                x.entries.len()
            ),
            RaftMessage::AppendEntriesResponse(x) => format!(
                "append_entries_response: from={}, term={}, success={}, match={}, append={}",
                x.from, x.term, x.success, x.match_index, x.append_index
            ),
            RaftMessage::Heartbeat(x) => format!(
                "heartbeat: from={}, term={}, commit={:?}-{}",
                x.from, x.leader_term, x.commit_index_term, x.commit_index
            ),
            RaftMessage::HeartbeatResponse(x) => format!("heartbeat_response: from={}", x.from),
            RaftMessage::LogCompactionInfo(x) => format!(
                "log_compaction_info: from={}, term={}, prev_index={}",
                x.from, x.leader_term, x.prev_index
            ),
            RaftMessage::Timeout(_) => self.kind().to_string(),
            RaftMessage::NewEntryRequest(c) => format!("new_entry_request: {}", c.summary()),
            RaftMessage::NewEntryBatchRequest(cs) => format!("new_entry_batch_request: n={}", cs.len()),
            RaftMessage::PruneRequest { prune_index } => format!("prune_request: {}", prune_index),
        }
    }
}

/// A message and the member it is sent to.
#[derive(Debug, Clone, PartialEq)]
pub struct Directed<D: AppData> {
    pub to: MemberId,
    pub message: RaftMessage<D>,
}

impl<D: AppData> Directed<D> {
    pub fn new(to: MemberId, message: RaftMessage<D>) -> Self {
        Self { to, message }
    }
}

impl<D: AppData> MessageSummary for Directed<D> {
    fn summary(&self) -> String {
        format!("to {}: {}", self.to, self.message.summary())
    }
}
