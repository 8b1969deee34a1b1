use crate::entry::AppData;
use crate::log::LogCommand;
use crate::machine::role::FollowerRole;
use crate::machine::role::RoleState;
use crate::machine::RaftState;
use crate::messages::Directed;
use crate::messages::RaftMessage;
use crate::shipping::ShipCommand;
use crate::LogIndex;
use crate::MemberId;
use crate::MessageSummary;
use crate::Term;

/// The decision taken for one message: the complete next state plus the side effects to carry
/// out.
///
/// It is computed without touching anything, then applied as a whole by `RaftState::update()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<D: AppData> {
    pub role: RoleState,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub leader_commit: LogIndex,

    /// The vote in `term`.
    pub voted_for: Option<MemberId>,

    pub commit_index: LogIndex,
    pub needs_fresh_snapshot: bool,

    pub renew_election_timeout: bool,

    /// This member won an election with this outcome.
    pub elected_leader: bool,

    /// This member was leader and is not any more.
    pub stepping_down: bool,

    pub log_commands: Vec<LogCommand<D>>,
    pub ship_commands: Vec<ShipCommand<D>>,
    pub out_messages: Vec<Directed<D>>,
}

impl<D: AppData> Outcome<D> {
    /// An outcome that changes nothing.
    pub fn new(state: &RaftState) -> Self {
        Self {
            role: state.role.clone(),
            term: state.term(),
            leader: state.leader,
            leader_commit: state.leader_commit,
            voted_for: state.voted_for(),
            commit_index: state.commit_index,
            needs_fresh_snapshot: state.needs_fresh_snapshot,
            renew_election_timeout: false,
            elected_leader: false,
            stepping_down: false,
            log_commands: vec![],
            ship_commands: vec![],
            out_messages: vec![],
        }
    }

    /// Move to `term` if it is newer. A new term starts without a vote.
    pub fn set_next_term(&mut self, term: Term) {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
        }
    }

    pub fn send(&mut self, to: MemberId, message: RaftMessage<D>) {
        self.out_messages.push(Directed::new(to, message));
    }

    pub fn add_log_command(&mut self, cmd: LogCommand<D>) {
        self.log_commands.push(cmd);
    }

    pub fn add_ship_command(&mut self, cmd: ShipCommand<D>) {
        self.ship_commands.push(cmd);
    }

    /// Advance the commit index. It never goes back.
    pub fn commit_to(&mut self, index: LogIndex) {
        if index > self.commit_index {
            self.commit_index = index;
        }
    }

    /// Become a follower without a known leader.
    pub fn step_down(&mut self) {
        if self.role.is_leader() {
            self.stepping_down = true;
        }
        self.role = RoleState::Follower(FollowerRole::default());
        self.leader = None;
    }

    /// Become a follower of `leader`, leaving any pre-election.
    pub fn follow(&mut self, leader: MemberId) {
        if self.role.is_leader() {
            self.stepping_down = true;
        }
        self.role = RoleState::Follower(FollowerRole::default());
        self.leader = Some(leader);
    }

    pub fn set_pre_election(&mut self, pre_election: bool) {
        if let RoleState::Follower(f) = &mut self.role {
            if f.pre_election != pre_election {
                f.pre_election = pre_election;
                f.pre_votes.clear();
            }
        }
    }
}

impl<D: AppData> MessageSummary for Outcome<D> {
    fn summary(&self) -> String {
        format!(
            "role={}, term={}, leader={:?}, commit={}, voted_for={:?}, log_cmds=[{}], ship_cmds=[{}], out=[{}]",
            self.role.role(),
            self.term,
            self.leader,
            self.commit_index,
            self.voted_for,
            self.log_commands.iter().map(|x| x.summary()).collect::<Vec<_>>().join(","),
            self.ship_commands.iter().map(|x| x.summary()).collect::<Vec<_>>().join(","),
            self.out_messages.iter().map(|x| x.summary()).collect::<Vec<_>>().join(","),
        )
    }
}
