use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::Config;
use crate::config::InFlightCacheType;
use crate::entry::AppData;
use crate::entry::RaftLogEntry;
use crate::LogIndex;

/// A cache of recently appended entries, read by log shippers before they fall back to the log.
///
/// Every cache starts disabled: `put()` is ignored and `get()` misses until `enable()`. Entries
/// replayed while recovering must never be served as freshly appended ones.
pub trait InFlightCache<D: AppData>: Send + Sync {
    fn enable(&mut self);

    fn is_enabled(&self) -> bool;

    fn put(&mut self, index: LogIndex, entry: RaftLogEntry<D>);

    fn get(&self, index: LogIndex) -> Option<RaftLogEntry<D>>;

    /// Drop every entry at and after `from_index`.
    fn truncate(&mut self, from_index: LogIndex);

    /// Drop every entry at and before `up_to_index`.
    fn prune(&mut self, up_to_index: LogIndex);

    fn total_bytes(&self) -> usize;

    fn elements(&self) -> usize;
}

/// A cache written by the raft task and read by log shippers.
pub type SharedInFlightCache<D> = Arc<RwLock<Box<dyn InFlightCache<D>>>>;

/// Build the cache selected by `config.in_flight_cache_type`.
pub fn new_in_flight_cache<D: AppData>(config: &Config) -> Box<dyn InFlightCache<D>> {
    match config.in_flight_cache_type {
        InFlightCacheType::Consecutive => Box::new(ConsecutiveInFlightCache::new(
            config.in_flight_cache_max_entries as usize,
            config.in_flight_cache_max_bytes as usize,
        )),
        InFlightCacheType::Unbounded => Box::new(UnboundedInFlightCache::new()),
        InFlightCacheType::None => Box::new(VoidInFlightCache),
    }
}

/// A cache of consecutive entries, bounded by both entry count and total bytes.
///
/// The oldest entries are evicted first. A `put()` that does not continue the cached range
/// clears the cache.
#[derive(Debug)]
pub struct ConsecutiveInFlightCache<D: AppData> {
    enabled: bool,
    max_entries: usize,
    max_bytes: usize,

    /// Index of `entries[0]`.
    first_index: LogIndex,
    entries: VecDeque<RaftLogEntry<D>>,
    total_bytes: usize,
}

impl<D: AppData> ConsecutiveInFlightCache<D> {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            enabled: false,
            max_entries,
            max_bytes,
            first_index: 0,
            entries: VecDeque::new(),
            total_bytes: 0,
        }
    }

    fn last_index(&self) -> LogIndex {
        self.first_index + self.entries.len() as LogIndex - 1
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    fn pop_front(&mut self) {
        if let Some(e) = self.entries.pop_front() {
            self.total_bytes -= e.size();
            self.first_index += 1;
        }
    }
}

impl<D: AppData> InFlightCache<D> for ConsecutiveInFlightCache<D> {
    fn enable(&mut self) {
        self.enabled = true;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn put(&mut self, index: LogIndex, entry: RaftLogEntry<D>) {
        if !self.enabled {
            return;
        }

        if !self.entries.is_empty() && index != self.last_index() + 1 {
            tracing::debug!(index, last_index = self.last_index(), "non-consecutive put, clear in-flight cache");
            self.clear();
        }

        let size = entry.size();
        if size > self.max_bytes || self.max_entries == 0 {
            self.clear();
            return;
        }

        while !self.entries.is_empty()
            && (self.entries.len() >= self.max_entries || self.total_bytes + size > self.max_bytes)
        {
            self.pop_front();
        }

        if self.entries.is_empty() {
            self.first_index = index;
        }
        self.entries.push_back(entry);
        self.total_bytes += size;
    }

    fn get(&self, index: LogIndex) -> Option<RaftLogEntry<D>> {
        if !self.enabled || self.entries.is_empty() {
            return None;
        }
        if index < self.first_index || index > self.last_index() {
            return None;
        }
        self.entries.get((index - self.first_index) as usize).cloned()
    }

    fn truncate(&mut self, from_index: LogIndex) {
        while !self.entries.is_empty() && self.last_index() >= from_index {
            if let Some(e) = self.entries.pop_back() {
                self.total_bytes -= e.size();
            }
        }
    }

    fn prune(&mut self, up_to_index: LogIndex) {
        while !self.entries.is_empty() && self.first_index <= up_to_index {
            self.pop_front();
        }
    }

    fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    fn elements(&self) -> usize {
        self.entries.len()
    }
}

/// A cache without bounds. Only for tests and small clusters that never lag.
#[derive(Debug)]
pub struct UnboundedInFlightCache<D: AppData> {
    enabled: bool,
    entries: BTreeMap<LogIndex, RaftLogEntry<D>>,
    total_bytes: usize,
}

impl<D: AppData> Default for UnboundedInFlightCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: AppData> UnboundedInFlightCache<D> {
    pub fn new() -> Self {
        Self {
            enabled: false,
            entries: BTreeMap::new(),
            total_bytes: 0,
        }
    }
}

impl<D: AppData> InFlightCache<D> for UnboundedInFlightCache<D> {
    fn enable(&mut self) {
        self.enabled = true;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn put(&mut self, index: LogIndex, entry: RaftLogEntry<D>) {
        if !self.enabled {
            return;
        }
        self.total_bytes += entry.size();
        if let Some(prev) = self.entries.insert(index, entry) {
            self.total_bytes -= prev.size();
        }
    }

    fn get(&self, index: LogIndex) -> Option<RaftLogEntry<D>> {
        if !self.enabled {
            return None;
        }
        self.entries.get(&index).cloned()
    }

    fn truncate(&mut self, from_index: LogIndex) {
        let removed = self.entries.split_off(&from_index);
        self.total_bytes -= removed.values().map(|x| x.size()).sum::<usize>();
    }

    fn prune(&mut self, up_to_index: LogIndex) {
        let kept = self.entries.split_off(&(up_to_index + 1));
        let removed = std::mem::replace(&mut self.entries, kept);
        self.total_bytes -= removed.values().map(|x| x.size()).sum::<usize>();
    }

    fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    fn elements(&self) -> usize {
        self.entries.len()
    }
}

/// A cache that caches nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct VoidInFlightCache;

impl<D: AppData> InFlightCache<D> for VoidInFlightCache {
    fn enable(&mut self) {}

    fn is_enabled(&self) -> bool {
        false
    }

    fn put(&mut self, _index: LogIndex, _entry: RaftLogEntry<D>) {}

    fn get(&self, _index: LogIndex) -> Option<RaftLogEntry<D>> {
        None
    }

    fn truncate(&mut self, _from_index: LogIndex) {}

    fn prune(&mut self, _up_to_index: LogIndex) {}

    fn total_bytes(&self) -> usize {
        0
    }

    fn elements(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ent(v: u64) -> RaftLogEntry<u64> {
        RaftLogEntry::normal(1, v)
    }

    #[test]
    fn test_disabled_until_enabled() {
        let mut c = ConsecutiveInFlightCache::<u64>::new(10, 1 << 20);

        c.put(0, ent(0));
        assert_eq!(None, c.get(0));
        assert_eq!(0, c.elements());

        c.enable();
        c.put(1, ent(1));
        assert_eq!(Some(ent(1)), c.get(1));
    }

    #[test]
    fn test_consecutive_evicts_oldest_by_count() {
        let mut c = ConsecutiveInFlightCache::<u64>::new(3, 1 << 20);
        c.enable();

        for i in 0..5 {
            c.put(i, ent(i as u64));
        }

        assert_eq!(3, c.elements());
        assert_eq!(None, c.get(1));
        assert_eq!(Some(ent(2)), c.get(2));
        assert_eq!(Some(ent(4)), c.get(4));
    }

    #[test]
    fn test_consecutive_evicts_oldest_by_bytes() {
        let one = ent(0).size();
        let mut c = ConsecutiveInFlightCache::<u64>::new(100, one * 2);
        c.enable();

        c.put(0, ent(0));
        c.put(1, ent(1));
        c.put(2, ent(2));

        assert_eq!(2, c.elements());
        assert_eq!(one * 2, c.total_bytes());
        assert_eq!(None, c.get(0));
    }

    #[test]
    fn test_consecutive_gap_clears() {
        let mut c = ConsecutiveInFlightCache::<u64>::new(10, 1 << 20);
        c.enable();

        c.put(0, ent(0));
        c.put(1, ent(1));
        c.put(5, ent(5));

        assert_eq!(1, c.elements());
        assert_eq!(None, c.get(1));
        assert_eq!(Some(ent(5)), c.get(5));
    }

    #[test]
    fn test_consecutive_truncate_and_prune() {
        let mut c = ConsecutiveInFlightCache::<u64>::new(10, 1 << 20);
        c.enable();

        for i in 0..6 {
            c.put(i, ent(i as u64));
        }

        c.truncate(4);
        assert_eq!(None, c.get(4));
        assert_eq!(Some(ent(3)), c.get(3));

        c.prune(1);
        assert_eq!(None, c.get(1));
        assert_eq!(Some(ent(2)), c.get(2));
        assert_eq!(2, c.elements());
        assert_eq!(ent(0).size() * 2, c.total_bytes());

        tracing::info!("--- appending after truncation continues the range");
        c.put(4, ent(40));
        assert_eq!(Some(ent(40)), c.get(4));
        assert_eq!(3, c.elements());
    }

    #[test]
    fn test_unbounded_and_void() {
        let mut u = UnboundedInFlightCache::<u64>::new();
        u.enable();
        for i in 0..5 {
            u.put(i, ent(i as u64));
        }
        u.truncate(3);
        u.prune(0);
        assert_eq!(2, u.elements());
        assert_eq!(Some(ent(2)), u.get(2));
        assert_eq!(ent(0).size() * 2, u.total_bytes());

        let mut v = VoidInFlightCache;
        InFlightCache::<u64>::enable(&mut v);
        InFlightCache::<u64>::put(&mut v, 0, ent(0));
        assert_eq!(None, InFlightCache::<u64>::get(&v, 0));
    }
}
