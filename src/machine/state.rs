use std::collections::BTreeSet;

use crate::config::Config;
use crate::entry::AppData;
use crate::log::InFlightCache;
use crate::log::RaftLog;
use crate::machine::role::FollowerState;
use crate::machine::role::Role;
use crate::machine::role::RoleState;
use crate::machine::Outcome;
use crate::state::RaftStores;
use crate::state::StorageError;
use crate::state::TermState;
use crate::state::VoteState;
use crate::LogIndex;
use crate::MemberId;
use crate::MessageSummary;
use crate::Term;
use crate::NO_INDEX;

/// The in-memory state of the raft machine, read by the role handlers and changed only by
/// applying an `Outcome`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftState {
    pub(crate) me: MemberId,
    pub(crate) term_state: TermState,
    pub(crate) vote_state: VoteState,
    pub(crate) role: RoleState,
    pub(crate) leader: Option<MemberId>,
    pub(crate) leader_commit: LogIndex,
    pub(crate) commit_index: LogIndex,
    pub(crate) voting_members: BTreeSet<MemberId>,
    pub(crate) replication_members: BTreeSet<MemberId>,
    pub(crate) needs_fresh_snapshot: bool,
    pub(crate) supports_pre_voting: bool,
    pub(crate) refuse_to_be_leader: bool,
    pub(crate) min_quorum_size: u64,
}

impl RaftState {
    pub fn new(me: MemberId, config: &Config) -> Self {
        Self {
            me,
            term_state: TermState::default(),
            vote_state: VoteState::default(),
            role: RoleState::default(),
            leader: None,
            leader_commit: NO_INDEX,
            commit_index: NO_INDEX,
            voting_members: BTreeSet::new(),
            replication_members: BTreeSet::new(),
            needs_fresh_snapshot: false,
            supports_pre_voting: config.enable_pre_voting,
            refuse_to_be_leader: config.refuse_to_be_leader,
            min_quorum_size: config.min_quorum_size,
        }
    }

    /// Load the safety state recovered from storage, with the highest index known to be
    /// committed.
    pub(crate) fn recover(&mut self, term_state: TermState, vote_state: VoteState, commit_index: LogIndex) {
        self.term_state = term_state;
        self.vote_state = vote_state;
        self.raise_commit_index(commit_index);
    }

    /// Move the commit index forward to `index`. Returns the resulting commit index.
    pub(crate) fn raise_commit_index(&mut self, index: LogIndex) -> LogIndex {
        if index > self.commit_index {
            self.commit_index = index;
        }
        self.commit_index
    }

    pub fn me(&self) -> MemberId {
        self.me
    }

    pub fn term(&self) -> Term {
        self.term_state.current_term()
    }

    /// The vote cast in the current term.
    pub fn voted_for(&self) -> Option<MemberId> {
        if self.vote_state.term() == self.term() {
            self.vote_state.voted_for()
        } else {
            None
        }
    }

    pub fn role(&self) -> Role {
        self.role.role()
    }

    pub fn role_state(&self) -> &RoleState {
        &self.role
    }

    pub fn leader(&self) -> Option<MemberId> {
        self.leader
    }

    pub fn leader_commit(&self) -> LogIndex {
        self.leader_commit
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn voting_members(&self) -> &BTreeSet<MemberId> {
        &self.voting_members
    }

    pub fn replication_members(&self) -> &BTreeSet<MemberId> {
        &self.replication_members
    }

    pub fn needs_fresh_snapshot(&self) -> bool {
        self.needs_fresh_snapshot
    }

    pub(crate) fn clear_needs_fresh_snapshot(&mut self) {
        self.needs_fresh_snapshot = false;
    }

    /// Members other than this one that receive the log.
    pub fn replication_targets(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.replication_members.iter().copied().filter(move |x| *x != self.me)
    }

    /// Members other than this one that vote.
    pub fn voting_targets(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.voting_members.iter().copied().filter(move |x| *x != self.me)
    }

    /// Replace the member sets. A leader starts tracking new replication targets and forgets
    /// removed ones.
    pub(crate) fn set_members(&mut self, voting: BTreeSet<MemberId>, replication: BTreeSet<MemberId>) {
        self.voting_members = voting;
        self.replication_members = replication;

        if let RoleState::Leader(l) = &mut self.role {
            let me = self.me;
            let replication = &self.replication_members;
            l.follower_states.retain(|id, _| replication.contains(id));
            for id in replication.iter().filter(|x| **x != me) {
                l.follower_states.entry(*id).or_insert_with(FollowerState::default);
            }
        }
    }

    /// Apply an outcome: persist term then vote, mutate log and in-flight cache, then take over
    /// role, leader and commit index.
    ///
    /// An error leaves the member in an undefined state and must stop it.
    pub(crate) async fn update<D, L>(
        &mut self,
        outcome: &Outcome<D>,
        log: &mut L,
        cache: &mut dyn InFlightCache<D>,
        stores: &RaftStores,
    ) -> Result<(), StorageError>
    where
        D: AppData,
        L: RaftLog<D> + ?Sized,
    {
        if self.term_state.update(outcome.term)? {
            stores.term.persist(&self.term_state).await?;
        }

        if self.vote_state.update(outcome.voted_for, outcome.term)? {
            stores.vote.persist(&self.vote_state).await?;
        }

        for cmd in outcome.log_commands.iter() {
            tracing::trace!(id = self.me, cmd = %cmd.summary(), "apply log command");
            cmd.apply_to_log(log)?;
            cmd.apply_to_cache(cache);
        }

        self.role = outcome.role.clone();
        self.leader = outcome.leader;
        self.leader_commit = outcome.leader_commit;
        self.needs_fresh_snapshot = outcome.needs_fresh_snapshot;

        if outcome.commit_index < self.commit_index {
            tracing::warn!(
                id = self.me,
                commit_index = self.commit_index,
                outcome_commit_index = outcome.commit_index,
                "ignore attempt to move commit index backward"
            );
        } else {
            self.commit_index = outcome.commit_index;
        }

        Ok(())
    }
}
