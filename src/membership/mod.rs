//! Membership: which members vote, which receive the log, and how the voting set is changed.
//!
//! Membership is itself replicated as `ReplicatedContent::Membership` entries. An appended entry
//! extends the set of members that receive the log at once, but it becomes the voting set only
//! once committed. At most one membership entry is uncommitted at any time.

mod catchup;


use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

pub(crate) use self::catchup::CatchupGoalTracker;
pub(crate) use self::catchup::CatchupProgress;
use crate::entry::AppData;
use crate::entry::MemberSet;
use crate::entry::RaftLogEntry;
use crate::log::LogCommand;
use crate::state::MembershipEntry;
use crate::state::RaftMembershipState;
use crate::state::StateStorage;
use crate::state::StorageError;
use crate::LogIndex;
use crate::MemberId;

/// What the leader is doing about membership.
#[derive(Debug, Clone)]
enum ChangerState {
    /// Not the leader.
    Inactive,

    /// Waiting for the voting set to differ from the target.
    Idle,

    /// A member is being caught up before it is proposed as a voter.
    CatchingUp(CatchupGoalTracker),

    /// This member set is proposed and not yet the committed one.
    ConsensusInProgress(BTreeSet<MemberId>),
}

/// Keeps the voting and replication sets in line with the log, and drives the voting set
/// towards the target set while leader.
pub(crate) struct RaftMembershipManager {
    me: MemberId,
    storage: Arc<dyn StateStorage<RaftMembershipState>>,
    state: RaftMembershipState,

    /// The member set this cluster should end up with. Empty means "keep what there is".
    target: BTreeSet<MemberId>,

    changer: ChangerState,

    /// Match indexes reported by log shippers.
    match_indexes: BTreeMap<MemberId, LogIndex>,

    round_timeout: Duration,
    catchup_timeout: Duration,
}

impl RaftMembershipManager {
    pub(crate) fn new(
        me: MemberId,
        storage: Arc<dyn StateStorage<RaftMembershipState>>,
        round_timeout: Duration,
        catchup_timeout: Duration,
    ) -> Self {
        Self {
            me,
            storage,
            state: RaftMembershipState::default(),
            target: BTreeSet::new(),
            changer: ChangerState::Inactive,
            match_indexes: BTreeMap::new(),
            round_timeout,
            catchup_timeout,
        }
    }

    /// Load the persisted membership state.
    pub(crate) async fn recover(&mut self) -> Result<(), StorageError> {
        self.state = self.storage.initial_state().await?;
        tracing::info!(id = self.me, state = ?self.state, "recovered membership");
        Ok(())
    }

    pub(crate) fn state(&self) -> &RaftMembershipState {
        &self.state
    }

    pub(crate) fn target(&self) -> &BTreeSet<MemberId> {
        &self.target
    }

    /// Members of the latest committed membership entry.
    pub(crate) fn voting_members(&self) -> BTreeSet<MemberId> {
        self.state.committed_members()
    }

    /// Voters, members of an uncommitted membership entry and a member being caught up.
    pub(crate) fn replication_members(&self) -> BTreeSet<MemberId> {
        let mut members = self.voting_members();
        if let Some(appended) = self.state.appended() {
            members.extend(appended.members.iter().copied());
        }
        if let ChangerState::CatchingUp(goal) = &self.changer {
            members.insert(goal.member());
        }
        members
    }

    pub(crate) fn set_target_membership_set(&mut self, target: BTreeSet<MemberId>) {
        tracing::info!(id = self.me, ?target, "target membership set");
        self.target = target;
    }

    /// Follow the log commands and the commit index of an applied outcome.
    pub(crate) async fn process_log<D: AppData>(
        &mut self,
        commit_index: LogIndex,
        commands: &[LogCommand<D>],
    ) -> Result<(), StorageError> {
        for cmd in commands {
            match cmd {
                LogCommand::Append { index, entry } => self.on_append(*index, std::slice::from_ref(entry)).await?,
                LogCommand::BatchAppend { base_index, entries } => self.on_append(*base_index, entries).await?,
                LogCommand::Truncate { from_index } => self.on_truncate(*from_index).await?,
                LogCommand::Prune { .. } => {}
            }
        }
        self.on_commit(commit_index).await
    }

    pub(crate) async fn on_append<D: AppData>(
        &mut self,
        base_index: LogIndex,
        entries: &[RaftLogEntry<D>],
    ) -> Result<(), StorageError> {
        for (i, entry) in entries.iter().enumerate() {
            let members = match entry.content.as_membership() {
                Some(x) => x,
                None => continue,
            };
            let index = base_index + i as LogIndex;

            // A leader proposes a membership entry only after the previous one is committed.
            if let Some(appended) = self.state.appended() {
                if appended.log_index < index {
                    let committed_index = appended.log_index;
                    tracing::debug!(
                        id = self.me,
                        committed_index,
                        index,
                        "membership entry follows an uncommitted one"
                    );
                    self.state.commit(committed_index);
                }
            }

            if self.state.append(index, members.members.clone())? {
                tracing::info!(id = self.me, index, members = ?members.members, "membership appended");
                self.persist().await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn on_truncate(&mut self, from_index: LogIndex) -> Result<(), StorageError> {
        if self.state.truncate(from_index)? {
            tracing::info!(id = self.me, from_index, "uncommitted membership truncated");
            self.persist().await?;
        }
        Ok(())
    }

    pub(crate) async fn on_commit(&mut self, commit_index: LogIndex) -> Result<(), StorageError> {
        if self.state.commit(commit_index) {
            tracing::info!(id = self.me, commit_index, voting = ?self.voting_members(), "membership committed");
            self.persist().await?;
        }
        Ok(())
    }

    /// Replace the membership with one installed from another member.
    pub(crate) async fn install(&mut self, committed: MembershipEntry) -> Result<(), StorageError> {
        tracing::info!(id = self.me, ?committed, "install membership");
        self.state.install(committed);
        self.persist().await
    }

    async fn persist(&self) -> Result<(), StorageError> {
        self.storage.persist(&self.state).await
    }

    pub(crate) fn on_replication_status(&mut self, target: MemberId, match_index: LogIndex) {
        self.match_indexes.insert(target, match_index);
    }

    /// Start or stop acting on the target set.
    pub(crate) fn on_role_changed(&mut self, is_leader: bool) {
        self.match_indexes.clear();
        self.changer = if is_leader {
            ChangerState::Idle
        } else {
            ChangerState::Inactive
        };
    }

    /// Move one step towards the target set. Returns a member set to propose, if any.
    pub(crate) fn tick(&mut self, now: Instant, leader_commit: LogIndex) -> Option<MemberSet> {
        match &mut self.changer {
            ChangerState::Inactive => None,
            ChangerState::ConsensusInProgress(proposed) => {
                // The proposal goes through the raft queue: it may not even be appended yet.
                if !self.state.uncommitted_member_change_in_log() && self.state.committed_members() == *proposed {
                    self.changer = ChangerState::Idle;
                }
                None
            }
            ChangerState::CatchingUp(goal) => {
                let member = goal.member();
                if !self.target.contains(&member) {
                    tracing::info!(id = self.me, member, "member no longer wanted, stop catching up");
                    self.changer = ChangerState::Idle;
                    return None;
                }

                let match_index = self.match_indexes.get(&member).copied().unwrap_or(crate::NO_INDEX);
                match goal.evaluate(now, match_index, leader_commit) {
                    CatchupProgress::InProgress => None,
                    CatchupProgress::Achieved => {
                        let mut members = self.voting_members();
                        members.insert(member);
                        tracing::info!(id = self.me, member, ?members, "member caught up, propose it as voter");
                        self.changer = ChangerState::ConsensusInProgress(members.clone());
                        Some(MemberSet::new(members))
                    }
                    CatchupProgress::Failed => {
                        tracing::warn!(
                            id = self.me,
                            member,
                            match_index,
                            goal_index = goal.goal_index(),
                            round = goal.round(),
                            "member failed to catch up, cluster membership is degraded, will retry"
                        );
                        self.changer = ChangerState::Idle;
                        None
                    }
                }
            }
            ChangerState::Idle => {
                if self.target.is_empty() || self.state.uncommitted_member_change_in_log() {
                    return None;
                }

                let voting = self.voting_members();

                if let Some(missing) = self.target.difference(&voting).next().copied() {
                    tracing::info!(id = self.me, member = missing, "start catching up a new member");
                    self.changer = ChangerState::CatchingUp(CatchupGoalTracker::new(
                        missing,
                        now,
                        leader_commit,
                        self.round_timeout,
                        self.catchup_timeout,
                    ));
                    return None;
                }

                let superfluous = voting.difference(&self.target).find(|x| **x != self.me).copied();
                if let Some(member) = superfluous {
                    let mut members = voting;
                    members.remove(&member);
                    tracing::info!(id = self.me, member, ?members, "propose removing member");
                    self.changer = ChangerState::ConsensusInProgress(members.clone());
                    return Some(MemberSet::new(members));
                }
                None
            }
        }
    }
}
