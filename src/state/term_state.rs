use serde::Deserialize;
use serde::Serialize;

use crate::state::StorageError;
use crate::Term;

/// The durable current term of a member.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermState {
    term: Term,
}

impl TermState {
    pub fn new(term: Term) -> Self {
        Self { term }
    }

    pub fn current_term(&self) -> Term {
        self.term
    }

    /// Move to a new term. Returns whether the term changed.
    ///
    /// A term never decreases.
    pub fn update(&mut self, new_term: Term) -> Result<bool, StorageError> {
        if new_term < self.term {
            return Err(StorageError::illegal_state(format!(
                "term can only be changed to a greater value, current: {}, change to: {}",
                self.term, new_term
            )));
        }

        let changed = new_term != self.term;
        self.term = new_term;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_state_update() -> anyhow::Result<()> {
        let mut ts = TermState::default();
        assert_eq!(0, ts.current_term());

        assert!(ts.update(3)?);
        assert!(!ts.update(3)?);
        assert_eq!(3, ts.current_term());

        let res = ts.update(2);
        assert!(matches!(res, Err(StorageError::IllegalState(_))));
        assert_eq!(3, ts.current_term());

        Ok(())
    }
}
