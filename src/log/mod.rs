//! The raft log, the in-flight cache in front of it and the commands that mutate both.
//!
//! A log has one writer, the raft task, and many readers, the log shippers. Implementations are
//! shared as `Arc<tokio::sync::RwLock<L>>`: the writer takes the write lock for the duration of
//! one outcome, shippers take short read locks to fetch batches.

mod cache;
mod command;
mod in_memory;


pub use self::cache::new_in_flight_cache;
pub use self::cache::ConsecutiveInFlightCache;
pub use self::cache::InFlightCache;
pub use self::cache::SharedInFlightCache;
pub use self::cache::UnboundedInFlightCache;
pub use self::cache::VoidInFlightCache;
pub use self::command::LogCommand;
pub use self::in_memory::InMemoryRaftLog;
use crate::entry::AppData;
use crate::entry::RaftLogEntry;
use crate::state::StorageError;
use crate::LogIndex;
use crate::Term;

/// A lazy, finite, forward-only sequence of `(index, entry)`.
pub type RaftLogCursor<'a, D> = Box<dyn Iterator<Item = Result<(LogIndex, RaftLogEntry<D>), StorageError>> + Send + 'a>;

/// Read access to the raft log.
pub trait ReadableRaftLog<D: AppData>: Send + Sync {
    /// The index of the last appended entry, `-1` for a log that never had one.
    fn append_index(&self) -> LogIndex;

    /// The index right before the first entry still present in the log.
    ///
    /// It moves forward on `prune()` and `skip()`.
    fn prev_index(&self) -> LogIndex;

    /// The term of the entry at `index`.
    ///
    /// The term at `prev_index()` is still known after pruning. Returns `None` for an index that
    /// is out of the log's range.
    fn read_entry_term(&self, index: LogIndex) -> Result<Option<Term>, StorageError>;

    /// Iterate entries starting at `from_index` up to `append_index()`.
    ///
    /// Reading from an already pruned index is an error.
    fn entry_cursor(&self, from_index: LogIndex) -> Result<RaftLogCursor<'_, D>, StorageError>;
}

/// The mutable raft log.
///
/// Every mutation must be durable when it returns: a follower acknowledges appended entries to
/// the leader right after `append()`.
pub trait RaftLog<D: AppData>: ReadableRaftLog<D> {
    /// Append entries after `append_index()`. Returns the new append index.
    fn append(&mut self, entries: &[RaftLogEntry<D>]) -> Result<LogIndex, StorageError>;

    /// Remove every entry at and after `from_index`.
    fn truncate(&mut self, from_index: LogIndex) -> Result<(), StorageError>;

    /// Discard entries up to `safe_index`, if they are no longer needed. Returns the new
    /// `prev_index()`.
    fn prune(&mut self, safe_index: LogIndex) -> Result<LogIndex, StorageError>;

    /// Fast-forward the log so that it continues right after `index`, which has term `term`.
    ///
    /// Used after installing state taken from another member. Has no effect if `index` is not
    /// beyond `append_index()`. Returns the new append index.
    fn skip(&mut self, index: LogIndex, term: Term) -> Result<LogIndex, StorageError>;
}

/// Read `max` entries starting at `from_index`, or fewer if the log ends before.
pub fn read_entries<D, L>(log: &L, from_index: LogIndex, max: usize) -> Result<Vec<RaftLogEntry<D>>, StorageError>
where
    D: AppData,
    L: ReadableRaftLog<D> + ?Sized,
{
    let mut res = Vec::with_capacity(max.min(1024));
    for item in log.entry_cursor(from_index)?.take(max) {
        let (_index, entry) = item?;
        res.push(entry);
    }
    Ok(res)
}
