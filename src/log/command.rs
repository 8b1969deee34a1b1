use crate::entry::AppData;
use crate::entry::RaftLogEntry;
use crate::log::InFlightCache;
use crate::log::RaftLog;
use crate::state::StorageError;
use crate::LogIndex;
use crate::MessageSummary;

/// A mutation of the log, decided by the raft machine and applied with the rest of an outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum LogCommand<D: AppData> {
    /// Append a single entry, which must land at `index`.
    Append { index: LogIndex, entry: RaftLogEntry<D> },

    /// Append entries starting at `base_index`.
    BatchAppend {
        base_index: LogIndex,
        entries: Vec<RaftLogEntry<D>>,
    },

    /// Remove every entry from `from_index` on.
    Truncate { from_index: LogIndex },

    /// Discard entries up to `prune_index`, if the log agrees.
    Prune { prune_index: LogIndex },
}

impl<D: AppData> LogCommand<D> {
    /// Apply to the log. Appends must continue the log exactly.
    pub fn apply_to_log<L>(&self, log: &mut L) -> Result<(), StorageError>
    where L: RaftLog<D> + ?Sized {
        match self {
            LogCommand::Append { index, entry } => {
                check_append_at(log.append_index(), *index)?;
                log.append(std::slice::from_ref(entry))?;
            }
            LogCommand::BatchAppend { base_index, entries } => {
                check_append_at(log.append_index(), *base_index)?;
                log.append(entries)?;
            }
            LogCommand::Truncate { from_index } => {
                log.truncate(*from_index)?;
            }
            LogCommand::Prune { prune_index } => {
                log.prune(*prune_index)?;
            }
        }
        Ok(())
    }

    pub fn apply_to_cache(&self, cache: &mut dyn InFlightCache<D>) {
        match self {
            LogCommand::Append { index, entry } => {
                cache.put(*index, entry.clone());
            }
            LogCommand::BatchAppend { base_index, entries } => {
                for (i, entry) in entries.iter().enumerate() {
                    cache.put(base_index + i as LogIndex, entry.clone());
                }
            }
            LogCommand::Truncate { from_index } => {
                cache.truncate(*from_index);
            }
            LogCommand::Prune { prune_index } => {
                cache.prune(*prune_index);
            }
        }
    }
}

fn check_append_at(append_index: LogIndex, at: LogIndex) -> Result<(), StorageError> {
    if at != append_index + 1 {
        return Err(StorageError::illegal_state(format!(
            "append at {} does not continue the log, append index: {}",
            at, append_index
        )));
    }
    Ok(())
}

impl<D: AppData> MessageSummary for LogCommand<D> {
    fn summary(&self) -> String {
        match self {
            LogCommand::Append { index, entry } => format!("append@{}:{}", index, entry.summary()),
            LogCommand::BatchAppend { base_index, entries } => {
                format!("batch-append@{}:[{}]", base_index, entries.as_slice().summary())
            }
            LogCommand::Truncate { from_index } => format!("truncate@{}", from_index),
            LogCommand::Prune { prune_index } => format!("prune@{}", prune_index),
        }
    }
}
