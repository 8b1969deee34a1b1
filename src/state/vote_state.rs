use serde::Deserialize;
use serde::Serialize;

use crate::state::StorageError;
use crate::MemberId;
use crate::Term;

/// The durable vote of a member: who it voted for, in which term.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteState {
    voted_for: Option<MemberId>,
    term: Term,
}

impl VoteState {
    pub fn new(voted_for: Option<MemberId>, term: Term) -> Self {
        Self { voted_for, term }
    }

    pub fn voted_for(&self) -> Option<MemberId> {
        self.voted_for
    }

    pub fn term(&self) -> Term {
        self.term
    }

    /// Record a vote. Returns whether anything changed and therefore has to be persisted.
    ///
    /// Moving to a new term resets the vote to `voted_for`. Within the same term a member votes at
    /// most once: changing an existing vote to another candidate is rejected.
    pub fn update(&mut self, voted_for: Option<MemberId>, term: Term) -> Result<bool, StorageError> {
        if term < self.term {
            return Err(StorageError::illegal_state(format!(
                "vote term can not go back, current: {}, change to: {}",
                self.term, term
            )));
        }

        if term > self.term {
            self.voted_for = voted_for;
            self.term = term;
            return Ok(true);
        }

        match (self.voted_for, voted_for) {
            (None, Some(_)) => {
                self.voted_for = voted_for;
                Ok(true)
            }
            (Some(curr), Some(to)) if curr != to => Err(StorageError::illegal_state(format!(
                "can only vote once per term: term: {}, voted for: {}, change to: {}",
                term, curr, to
            ))),
            _ => Ok(false),
        }
    }
}
