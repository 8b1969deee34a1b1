//! Hooks for an external monitoring system.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use crate::Term;

/// Receives events of a running raft member.
///
/// Called on the raft task: implementations must return quickly.
pub trait RaftMonitor: Send + Sync + 'static {
    /// A message of `kind` was handled. `queue_delay` is the time it waited in the inbound queue.
    fn message_processed(&self, kind: &'static str, queue_delay: Duration, handle_time: Duration);

    /// `Raft::leader()` was called while no leader was known.
    fn leader_not_found(&self);

    fn term_changed(&self, term: Term);
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl RaftMonitor for NoopMonitor {
    fn message_processed(&self, _kind: &'static str, _queue_delay: Duration, _handle_time: Duration) {}

    fn leader_not_found(&self) {}

    fn term_changed(&self, _term: Term) {}
}

/// Counts events, mainly for tests.
#[derive(Debug, Default)]
pub struct CountingMonitor {
    processed: Mutex<BTreeMap<&'static str, u64>>,
    leader_not_found: AtomicU64,
    term: AtomicU64,
}

impl CountingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of handled messages of `kind`.
    pub fn processed(&self, kind: &str) -> u64 {
        match self.processed.lock() {
            Ok(m) => m.get(kind).copied().unwrap_or_default(),
            Err(_) => 0,
        }
    }

    pub fn leader_not_found_count(&self) -> u64 {
        self.leader_not_found.load(Ordering::Relaxed)
    }

    /// The last reported term.
    pub fn term(&self) -> Term {
        self.term.load(Ordering::Relaxed)
    }
}

impl RaftMonitor for CountingMonitor {
    fn message_processed(&self, kind: &'static str, _queue_delay: Duration, _handle_time: Duration) {
        if let Ok(mut m) = self.processed.lock() {
            *m.entry(kind).or_default() += 1;
        }
    }

    fn leader_not_found(&self) {
        self.leader_not_found.fetch_add(1, Ordering::Relaxed);
    }

    fn term_changed(&self, term: Term) {
        self.term.store(term, Ordering::Relaxed);
    }
}
