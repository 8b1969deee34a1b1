use std::collections::VecDeque;
use std::io;

use crate::entry::AppData;
use crate::entry::RaftLogEntry;
use crate::log::RaftLog;
use crate::log::RaftLogCursor;
use crate::log::ReadableRaftLog;
use crate::state::ErrorSubject;
use crate::state::ErrorVerb;
use crate::state::StorageError;
use crate::LogIndex;
use crate::Term;
use crate::NO_INDEX;

/// A `RaftLog` kept in memory.
///
/// `entries[i]` is the entry at `prev_index + 1 + i`.
#[derive(Debug, Clone)]
pub struct InMemoryRaftLog<D: AppData> {
    entries: VecDeque<RaftLogEntry<D>>,
    prev_index: LogIndex,
    prev_term: Term,
    failing: bool,
    failing_reads: bool,
}

impl<D: AppData> Default for InMemoryRaftLog<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: AppData> InMemoryRaftLog<D> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            prev_index: NO_INDEX,
            prev_term: 0,
            failing: false,
            failing_reads: false,
        }
    }

    /// Make every following mutation fail with an io error.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    /// Make every following read of an entry or of its term fail with an io error.
    pub fn set_failing_reads(&mut self, failing: bool) {
        self.failing_reads = failing;
    }

    fn check_failing(&self, verb: ErrorVerb) -> Result<(), StorageError> {
        let failing = match verb {
            ErrorVerb::Read => self.failing_reads,
            _ => self.failing,
        };
        if failing {
            let err = io::Error::new(io::ErrorKind::Other, "injected log failure");
            return Err(StorageError::io(ErrorSubject::Logs, verb, &err));
        }
        Ok(())
    }

    fn offset(&self, index: LogIndex) -> usize {
        (index - self.prev_index - 1) as usize
    }

    fn last_term(&self) -> Term {
        self.entries.back().map(|x| x.term).unwrap_or(self.prev_term)
    }
}

impl<D: AppData> ReadableRaftLog<D> for InMemoryRaftLog<D> {
    fn append_index(&self) -> LogIndex {
        self.prev_index + self.entries.len() as LogIndex
    }

    fn prev_index(&self) -> LogIndex {
        self.prev_index
    }

    fn read_entry_term(&self, index: LogIndex) -> Result<Option<Term>, StorageError> {
        self.check_failing(ErrorVerb::Read)?;

        if index == self.prev_index && index != NO_INDEX {
            return Ok(Some(self.prev_term));
        }
        if index <= self.prev_index || index > self.append_index() {
            return Ok(None);
        }
        Ok(self.entries.get(self.offset(index)).map(|x| x.term))
    }

    fn entry_cursor(&self, from_index: LogIndex) -> Result<RaftLogCursor<'_, D>, StorageError> {
        self.check_failing(ErrorVerb::Read)?;

        if from_index <= self.prev_index {
            return Err(StorageError::illegal_state(format!(
                "entry {} is pruned, prev index: {}",
                from_index, self.prev_index
            )));
        }

        let start = from_index;
        let it = self.entries.iter().skip(self.offset(from_index)).enumerate().map(move |(i, entry)| {
            let index = start + i as LogIndex;
            Ok((index, entry.clone()))
        });
        Ok(Box::new(it))
    }
}

impl<D: AppData> RaftLog<D> for InMemoryRaftLog<D> {
    fn append(&mut self, entries: &[RaftLogEntry<D>]) -> Result<LogIndex, StorageError> {
        self.check_failing(ErrorVerb::Write)?;

        let mut last_term = self.last_term();
        for entry in entries {
            if entry.term < last_term {
                return Err(StorageError::illegal_state(format!(
                    "non-monotonic term {} after {} at index {}",
                    entry.term,
                    last_term,
                    self.append_index() + 1
                )));
            }
            last_term = entry.term;
        }

        self.entries.extend(entries.iter().cloned());
        Ok(self.append_index())
    }

    fn truncate(&mut self, from_index: LogIndex) -> Result<(), StorageError> {
        self.check_failing(ErrorVerb::Delete)?;

        if from_index <= self.prev_index {
            return Err(StorageError::illegal_state(format!(
                "can not truncate at {}, prev index: {}",
                from_index, self.prev_index
            )));
        }
        if from_index > self.append_index() {
            return Err(StorageError::illegal_state(format!(
                "can not truncate at {}, append index: {}",
                from_index,
                self.append_index()
            )));
        }

        let keep = self.offset(from_index);
        self.entries.truncate(keep);
        Ok(())
    }

    fn prune(&mut self, safe_index: LogIndex) -> Result<LogIndex, StorageError> {
        self.check_failing(ErrorVerb::Delete)?;

        if safe_index <= self.prev_index {
            return Ok(self.prev_index);
        }

        let until = safe_index.min(self.append_index());
        if until <= self.prev_index {
            return Ok(self.prev_index);
        }

        let new_prev_term = self.read_entry_term(until)?.unwrap_or(self.prev_term);
        let n = self.offset(until) + 1;
        self.entries.drain(..n);
        self.prev_index = until;
        self.prev_term = new_prev_term;

        Ok(self.prev_index)
    }

    fn skip(&mut self, index: LogIndex, term: Term) -> Result<LogIndex, StorageError> {
        self.check_failing(ErrorVerb::Write)?;

        if index > self.append_index() {
            self.entries.clear();
            self.prev_index = index;
            self.prev_term = term;
        }
        Ok(self.append_index())
    }
}
