//! Majority arithmetic.

#[cfg(test)]
mod quorum_test;

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::LogIndex;
use crate::MemberId;
use crate::NO_INDEX;

/// Whether `votes_excluding_self` other members plus the implicit own vote form a majority of a
/// cluster of `cluster_size`.
///
/// No quorum is possible while the cluster is smaller than `min_quorum_size`.
pub fn is_quorum(min_quorum_size: u64, cluster_size: usize, votes_excluding_self: usize) -> bool {
    if (cluster_size as u64) < min_quorum_size {
        return false;
    }
    votes_excluding_self >= cluster_size / 2
}

/// Like [`is_quorum`], counting only the voters in `votes` that are members of `voting` and are
/// not `me`.
pub fn is_quorum_of(
    min_quorum_size: u64,
    voting: &BTreeSet<MemberId>,
    me: MemberId,
    votes: &BTreeSet<MemberId>,
) -> bool {
    let n = votes.iter().filter(|x| **x != me && voting.contains(x)).count();
    is_quorum(min_quorum_size, voting.len(), n)
}

/// The highest index, not beyond `my_append_index`, that a quorum of `voting` holds.
///
/// `match_indexes` are the match indexes of other members. Members not in `voting` are ignored.
pub fn quorum_match_index(
    min_quorum_size: u64,
    voting: &BTreeSet<MemberId>,
    me: MemberId,
    my_append_index: LogIndex,
    match_indexes: &BTreeMap<MemberId, LogIndex>,
) -> Option<LogIndex> {
    let others = match_indexes
        .iter()
        .filter(|(id, _)| **id != me && voting.contains(id))
        .map(|(_, idx)| *idx)
        .collect::<Vec<_>>();

    let mut candidates = others.iter().copied().filter(|x| *x <= my_append_index).collect::<Vec<_>>();
    candidates.push(my_append_index);
    candidates.sort_unstable_by(|a, b| b.cmp(a));
    candidates.dedup();
    candidates.retain(|x| *x > NO_INDEX);

    candidates.into_iter().find(|n| {
        let count = others.iter().filter(|x| **x >= *n).count();
        is_quorum(min_quorum_size, voting.len(), count)
    })
}
