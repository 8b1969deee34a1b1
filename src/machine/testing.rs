//! Helpers to build a `RaftState` and a log for machine tests.

use std::collections::BTreeSet;

use crate::config::Config;
use crate::entry::RaftLogEntry;
use crate::log::InMemoryRaftLog;
use crate::log::RaftLog;
use crate::log::UnboundedInFlightCache;
use crate::machine::Outcome;
use crate::machine::RaftState;
use crate::messages::RaftMessage;
use crate::state::RaftStores;
use crate::state::TermState;
use crate::state::VoteState;
use crate::MemberId;
use crate::Term;
use crate::NO_INDEX;

pub(crate) fn members(ids: &[MemberId]) -> BTreeSet<MemberId> {
    ids.iter().copied().collect()
}

/// A follower `me` in term `term` of a cluster where `ids` all vote and replicate.
pub(crate) fn state_with(me: MemberId, ids: &[MemberId], term: Term, config: &Config) -> RaftState {
    let mut st = RaftState::new(me, config);
    st.recover(TermState::new(term), VoteState::new(None, term), NO_INDEX);
    st.set_members(members(ids), members(ids));
    st
}

pub(crate) fn state(me: MemberId, ids: &[MemberId], term: Term) -> RaftState {
    state_with(me, ids, term, &Config::default())
}

/// A log holding one entry per element of `terms`, starting at index 0.
pub(crate) fn log_of(terms: &[Term]) -> InMemoryRaftLog<u64> {
    let mut log = InMemoryRaftLog::new();
    let entries = terms.iter().enumerate().map(|(i, t)| RaftLogEntry::normal(*t, i as u64)).collect::<Vec<_>>();
    if !entries.is_empty() {
        log.append(&entries).unwrap();
    }
    log
}

/// Apply an outcome the way the runtime does, with in-memory stores.
pub(crate) fn apply(state: &mut RaftState, outcome: &Outcome<u64>, log: &mut InMemoryRaftLog<u64>) {
    let mut cache = UnboundedInFlightCache::new();
    let stores = RaftStores::in_memory();
    futures::executor::block_on(state.update(outcome, log, &mut cache, &stores)).unwrap();
}

/// Messages in `outcome` addressed to `to`.
pub(crate) fn sent_to(outcome: &Outcome<u64>, to: MemberId) -> Vec<RaftMessage<u64>> {
    outcome.out_messages.iter().filter(|d| d.to == to).map(|d| d.message.clone()).collect()
}
