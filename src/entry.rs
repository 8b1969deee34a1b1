//! Log entries and the content they replicate.

use std::collections::BTreeSet;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::MemberId;
use crate::MessageSummary;
use crate::Term;

/// A trait defining application specific data.
///
/// The consensus core never looks inside application data: it is appended, cached, shipped and
/// committed as an opaque value.
pub trait AppData: Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// An estimate of the in-memory size of this value, in bytes.
    ///
    /// It is used to bound the in-flight cache. Values that return `None` are accounted with a
    /// fixed size.
    fn size(&self) -> Option<usize> {
        None
    }
}

impl AppData for u64 {}

impl AppData for String {
    fn size(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl AppData for Vec<u8> {
    fn size(&self) -> Option<usize> {
        Some(self.len())
    }
}

/// Size accounted for a value that does not report its own.
pub(crate) const DEFAULT_CONTENT_SIZE: usize = 64;

/// A set of cluster members, replicated as log content to change membership.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSet {
    pub members: BTreeSet<MemberId>,
}

impl MemberSet {
    pub fn new(members: BTreeSet<MemberId>) -> Self {
        Self { members }
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl From<BTreeSet<MemberId>> for MemberSet {
    fn from(members: BTreeSet<MemberId>) -> Self {
        Self { members }
    }
}

/// The content of a log entry.
///
/// Only `Membership` and `NewLeaderBarrier` are interpreted by the consensus core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "D: AppData")]
pub enum ReplicatedContent<D: AppData> {
    /// Application data.
    Normal(D),

    /// A new member set. It becomes the voting set once the entry is committed.
    Membership(MemberSet),

    /// Appended by a newly elected leader to commit entries left over by previous terms.
    NewLeaderBarrier,
}

impl<D: AppData> ReplicatedContent<D> {
    pub fn size(&self) -> usize {
        match self {
            ReplicatedContent::Normal(d) => d.size().unwrap_or(DEFAULT_CONTENT_SIZE),
            ReplicatedContent::Membership(m) => std::mem::size_of::<MemberId>() * m.len(),
            ReplicatedContent::NewLeaderBarrier => 0,
        }
    }

    pub fn as_membership(&self) -> Option<&MemberSet> {
        match self {
            ReplicatedContent::Membership(m) => Some(m),
            _ => None,
        }
    }
}

impl<D: AppData> MessageSummary for ReplicatedContent<D> {
    fn summary(&self) -> String {
        match self {
            ReplicatedContent::Normal(_) => "normal".to_string(),
            ReplicatedContent::Membership(m) => format!("membership: {:?}", m.members),
            ReplicatedContent::NewLeaderBarrier => "barrier".to_string(),
        }
    }
}

/// A single entry of the raft log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "D: AppData")]
pub struct RaftLogEntry<D: AppData> {
    /// The term of the leader that created this entry.
    pub term: Term,
    pub content: ReplicatedContent<D>,
}

impl<D: AppData> RaftLogEntry<D> {
    pub fn new(term: Term, content: ReplicatedContent<D>) -> Self {
        Self { term, content }
    }

    pub fn normal(term: Term, data: D) -> Self {
        Self::new(term, ReplicatedContent::Normal(data))
    }

    pub fn barrier(term: Term) -> Self {
        Self::new(term, ReplicatedContent::NewLeaderBarrier)
    }

    pub fn membership(term: Term, members: BTreeSet<MemberId>) -> Self {
        Self::new(term, ReplicatedContent::Membership(MemberSet::new(members)))
    }

    /// Bytes accounted for this entry by the in-flight cache.
    pub fn size(&self) -> usize {
        std::mem::size_of::<Term>() + self.content.size()
    }
}

impl<D: AppData> MessageSummary for RaftLogEntry<D> {
    fn summary(&self) -> String {
        format!("{}:{}", self.term, self.content.summary())
    }
}

impl<D: AppData> MessageSummary for &[RaftLogEntry<D>] {
    fn summary(&self) -> String {
        let mut res = Vec::with_capacity(self.len());
        for x in self.iter() {
            res.push(x.summary());
        }
        res.join(",")
    }
}
