//! Election and heartbeat timers.
//!
//! A timer is a task that posts `RaftMsg::Timeout` into the raft task's queue. Every (re)start
//! bumps the generation of the timer, so a timeout that was already queued when the timer was
//! renewed is recognized as stale and dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_futures::Instrument;

use crate::config::Config;
use crate::core::RaftMsg;
use crate::entry::AppData;
use crate::messages::TimeoutKind;
use crate::MemberId;

struct Timer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    fn new() -> Self {
        Self {
            generation: 0,
            handle: None,
        }
    }

    fn cancel(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
        }
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

/// The election timer, running on every role, and the heartbeat timer, running only on a
/// leader.
pub(crate) struct LeaderAvailabilityTimers<D: AppData> {
    me: MemberId,
    config: Arc<Config>,
    tx_api: mpsc::UnboundedSender<RaftMsg<D>>,
    election: Timer,
    heartbeat: Timer,
}

impl<D: AppData> LeaderAvailabilityTimers<D> {
    pub(crate) fn new(me: MemberId, config: Arc<Config>, tx_api: mpsc::UnboundedSender<RaftMsg<D>>) -> Self {
        Self {
            me,
            config,
            tx_api,
            election: Timer::new(),
            heartbeat: Timer::new(),
        }
    }

    /// Start the election timer. Called once recovery is complete.
    pub(crate) fn start(&mut self) {
        tracing::debug!(id = self.me, "start timers");
        self.renew_election();
    }

    pub(crate) fn is_election_running(&self) -> bool {
        self.election.is_running()
    }

    pub(crate) fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.is_running()
    }

    /// Cancel and reschedule the election timer with a new random timeout.
    ///
    /// The timer keeps firing, once per random timeout, until renewed again.
    pub(crate) fn renew_election(&mut self) {
        self.election.cancel();
        self.election.generation += 1;

        let generation = self.election.generation;
        let config = self.config.clone();
        let tx = self.tx_api.clone();

        let fu = async move {
            loop {
                tokio::time::sleep(config.new_rand_election_timeout()).await;
                let sent = tx.send(RaftMsg::Timeout {
                    kind: TimeoutKind::Election,
                    generation,
                });
                if sent.is_err() {
                    return;
                }
            }
        };

        let span = tracing::trace_span!("election_timer", id = self.me, generation);
        self.election.handle = Some(tokio::spawn(fu.instrument(span)));
    }

    /// Start sending heartbeat timeouts at a fixed interval. The first one fires at once.
    pub(crate) fn start_heartbeats(&mut self) {
        self.heartbeat.cancel();
        self.heartbeat.generation += 1;

        let generation = self.heartbeat.generation;
        let interval = self.config.heartbeat_interval();
        let tx = self.tx_api.clone();

        let fu = async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sent = tx.send(RaftMsg::Timeout {
                    kind: TimeoutKind::Heartbeat,
                    generation,
                });
                if sent.is_err() {
                    return;
                }
            }
        };

        let span = tracing::trace_span!("heartbeat_timer", id = self.me, generation);
        self.heartbeat.handle = Some(tokio::spawn(fu.instrument(span)));
    }

    pub(crate) fn stop_heartbeats(&mut self) {
        self.heartbeat.cancel();
        self.heartbeat.generation += 1;
    }

    /// Stop both timers. Timeouts already queued become stale.
    pub(crate) fn stop(&mut self) {
        tracing::debug!(id = self.me, "stop timers");
        self.election.cancel();
        self.election.generation += 1;
        self.stop_heartbeats();
    }

    /// Whether a timeout of `kind` was posted by the currently scheduled timer.
    pub(crate) fn is_current(&self, kind: TimeoutKind, generation: u64) -> bool {
        let timer = match kind {
            TimeoutKind::Election => &self.election,
            TimeoutKind::Heartbeat => &self.heartbeat,
        };
        timer.is_running() && timer.generation == generation
    }
}

impl<D: AppData> Drop for LeaderAvailabilityTimers<D> {
    fn drop(&mut self) {
        self.election.cancel();
        self.heartbeat.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::MessageSummary;

    fn config() -> Arc<Config> {
        Arc::new(Config {
            election_timeout: 50,
            heartbeat_interval: 10,
            ..Default::default()
        })
    }

    async fn next_timeout(rx: &mut mpsc::UnboundedReceiver<RaftMsg<u64>>) -> (TimeoutKind, u64) {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        match msg {
            RaftMsg::Timeout { kind, generation } => (kind, generation),
            other => panic!("unexpected: {}", other.summary()),
        }
    }

    #[tokio::test]
    async fn test_election_timer_fires_repeatedly_until_renewed() -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = LeaderAvailabilityTimers::<u64>::new(1, config(), tx);

        timers.start();
        let (kind, g1) = next_timeout(&mut rx).await;
        assert_eq!(TimeoutKind::Election, kind);
        assert!(timers.is_current(kind, g1));
        assert_eq!((kind, g1), next_timeout(&mut rx).await);

        timers.renew_election();
        assert!(!timers.is_current(TimeoutKind::Election, g1), "stale after renew");

        let (_, g2) = loop {
            let got = next_timeout(&mut rx).await;
            if got.1 != g1 {
                break got;
            }
        };
        assert!(timers.is_current(TimeoutKind::Election, g2));
        Ok(())
    }

    #[tokio::test]
    async fn test_heartbeat_timer_runs_only_when_started() -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = LeaderAvailabilityTimers::<u64>::new(1, config(), tx);

        timers.start_heartbeats();
        assert!(timers.is_heartbeat_running());
        assert!(!timers.is_election_running());

        let (kind, g) = next_timeout(&mut rx).await;
        assert_eq!(TimeoutKind::Heartbeat, kind);
        assert!(timers.is_current(kind, g));

        timers.stop_heartbeats();
        assert!(!timers.is_current(kind, g));
        assert!(!timers.is_heartbeat_running());

        timers.stop();
        assert!(!timers.is_election_running());
        Ok(())
    }
}
