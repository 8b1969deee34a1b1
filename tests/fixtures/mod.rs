//! Fixtures for testing Raft.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Once;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use causal_raft::async_trait::async_trait;
use causal_raft::log::InMemoryRaftLog;
use causal_raft::messages::RaftMessage;
use causal_raft::metrics::Wait;
use causal_raft::monitoring::CountingMonitor;
use causal_raft::monitoring::RaftMonitor;
use causal_raft::state::RaftStores;
use causal_raft::ClientWriteError;
use causal_raft::Config;
use causal_raft::Inbound;
use causal_raft::InboundHandler;
use causal_raft::LogIndex;
use causal_raft::MemberId;
use causal_raft::Outbound;
use causal_raft::Raft;
use causal_raft::RaftMetrics;
use causal_raft::ServerState;
use tokio::sync::RwLock;

#[allow(unused)]
macro_rules! func_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let n = &name[..name.len() - 3];
        let nn = n.replace("::{{closure}}", "");
        nn
    }};
}

#[allow(unused)]
macro_rules! init_ut {
    () => {{
        let name = func_name!();
        let last = name.split("::").last().unwrap();

        crate::fixtures::init_default_ut_tracing();

        tracing::debug_span!("ut", "{}", last)
    }};
}

/// The raft type used in tests: every entry carries a `u64`.
pub type MemRaft = Raft<u64>;

pub type MemLog = Arc<RwLock<InMemoryRaftLog<u64>>>;

/// Install a global tracing subscriber, once. The filter is read from `RUST_LOG`.
pub fn init_default_ut_tracing() {
    static START: Once = Once::new();

    START.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().init();
    });
}

/// A config with short timeouts, so that tests finish quickly.
pub fn test_config() -> Config {
    Config {
        cluster_name: "test".to_string(),
        election_timeout: 150,
        heartbeat_interval: 30,
        resend_interval: 50,
        catchup_timeout: 2_000,
        ..Default::default()
    }
}

pub fn timeout() -> Option<Duration> {
    Some(Duration::from_millis(3_000))
}

/// Everything a running member is made of. The log and the stores outlive the raft task, to
/// inspect them or to restart a member on them.
#[derive(Clone)]
pub struct TestMember {
    pub raft: MemRaft,
    pub log: MemLog,
    pub stores: RaftStores,
    pub monitor: Arc<CountingMonitor>,
    pub inbound: Arc<RouterInbound>,
}

/// The receiving end of a member: the router delivers to the handler the member registered.
#[derive(Default)]
pub struct RouterInbound {
    handler: Mutex<Option<InboundHandler<u64>>>,
}

impl Inbound<u64> for RouterInbound {
    fn register_handler(&self, handler: InboundHandler<u64>) {
        *self.handler.lock().unwrap() = Some(handler);
    }
}

impl RouterInbound {
    pub fn deliver(&self, message: RaftMessage<u64>) -> Result<()> {
        let handler = self.handler.lock().unwrap().clone();
        let handler = handler.context("no handler registered")?;
        handler.handle(message)?;
        Ok(())
    }
}

/// An in-process network: every member sends to the others through the routing table.
#[derive(Clone)]
pub struct RaftRouter {
    config: Arc<Config>,

    /// The members of the cluster.
    routing_table: Arc<Mutex<BTreeMap<MemberId, TestMember>>>,

    /// Members which are isolated can neither send nor receive messages.
    isolated_nodes: Arc<Mutex<HashSet<MemberId>>>,

    /// Count of messages dropped because the sender or the receiver is isolated.
    dropped: Arc<AtomicU64>,
}

/// The `Outbound` of a single member.
struct RouterOutbound {
    from: MemberId,
    router: RaftRouter,
}

#[async_trait]
impl Outbound<u64> for RouterOutbound {
    async fn send(&self, to: MemberId, message: RaftMessage<u64>, _block: bool) -> Result<()> {
        if let Err(e) = self.router.check_reachable(self.from, to) {
            self.router.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        let member = self.router.get_member(&to)?;
        member.inbound.deliver(message)
    }
}

impl RaftRouter {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            routing_table: Default::default(),
            isolated_nodes: Default::default(),
            dropped: Default::default(),
        }
    }

    /// Create a member with an empty in-memory log and in-memory stores, and finish its recovery.
    pub async fn new_raft_node(&self, id: MemberId) -> Result<TestMember> {
        let log = Arc::new(RwLock::new(InMemoryRaftLog::new()));
        self.new_raft_node_with(id, log, RaftStores::in_memory()).await
    }

    /// Create a member on an existing log and stores, e.g. those of a member shut down before.
    pub async fn new_raft_node_with(&self, id: MemberId, log: MemLog, stores: RaftStores) -> Result<TestMember> {
        let member = self.spawn_member(id, log, stores);
        member.raft.post_recovery_actions().await?;
        Ok(member)
    }

    /// Create a member without finishing its recovery: it has no timers yet.
    pub fn spawn_member(&self, id: MemberId, log: MemLog, stores: RaftStores) -> TestMember {
        let monitor = Arc::new(CountingMonitor::new());
        let outbound = Arc::new(RouterOutbound {
            from: id,
            router: self.clone(),
        });

        let raft = Raft::new(
            id,
            self.config.clone(),
            log.clone(),
            stores.clone(),
            outbound,
            monitor.clone() as Arc<dyn RaftMonitor>,
        );

        let inbound = Arc::new(RouterInbound::default());
        raft.register_inbound(&*inbound);

        let member = TestMember {
            raft,
            log,
            stores,
            monitor,
            inbound,
        };

        let mut rt = self.routing_table.lock().unwrap();
        rt.insert(id, member.clone());
        member
    }

    /// Remove a member from the network. The member keeps running until it is shut down.
    pub fn remove_node(&self, id: MemberId) -> Option<TestMember> {
        let member = {
            let mut rt = self.routing_table.lock().unwrap();
            rt.remove(&id)
        };
        self.isolated_nodes.lock().unwrap().remove(&id);
        member
    }

    /// Create one member per id and bootstrap the cluster on the smallest one.
    ///
    /// Returns the leader, once every member follows it.
    pub async fn new_cluster(&self, members: BTreeSet<MemberId>) -> Result<MemberId> {
        for id in members.iter() {
            self.new_raft_node(*id).await?;
        }

        let first = *members.iter().next().context("no member to bootstrap")?;
        tracing::info!("--- bootstrap cluster {:?} on {}", members, first);
        self.get_raft_handle(&first)?.bootstrap(members.clone()).await?;

        self.wait_for_leader(&members, timeout(), "new cluster").await
    }

    pub fn isolate_node(&self, id: MemberId) {
        self.isolated_nodes.lock().unwrap().insert(id);
    }

    pub fn restore_node(&self, id: MemberId) {
        self.isolated_nodes.lock().unwrap().remove(&id);
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn check_reachable(&self, from: MemberId, to: MemberId) -> Result<()> {
        let isolated = self.isolated_nodes.lock().unwrap();
        if isolated.contains(&from) || isolated.contains(&to) {
            anyhow::bail!("unreachable: {} -> {}", from, to);
        }
        Ok(())
    }

    pub fn get_raft_handle(&self, id: &MemberId) -> Result<MemRaft> {
        Ok(self.get_member(id)?.raft)
    }

    pub fn get_member(&self, id: &MemberId) -> Result<TestMember> {
        let rt = self.routing_table.lock().unwrap();
        rt.get(id).cloned().with_context(|| format!("member {} not found in routing table", id))
    }

    pub fn get_metrics(&self, id: &MemberId) -> Result<RaftMetrics> {
        let raft = self.get_raft_handle(id)?;
        let metrics = raft.metrics().borrow().clone();
        Ok(metrics)
    }

    pub fn latest_metrics(&self) -> Vec<RaftMetrics> {
        let rt = self.routing_table.lock().unwrap();
        rt.values().map(|m| m.raft.metrics().borrow().clone()).collect()
    }

    pub fn wait(&self, id: &MemberId, timeout: Option<Duration>) -> Result<Wait> {
        Ok(self.get_raft_handle(id)?.wait(timeout))
    }

    /// The leader among the members that are not isolated.
    pub fn leader(&self) -> Option<MemberId> {
        let isolated = self.isolated_nodes.lock().unwrap().clone();
        self.latest_metrics().into_iter().find_map(|m| {
            if m.state == ServerState::Leader && !isolated.contains(&m.id) {
                Some(m.id)
            } else {
                None
            }
        })
    }

    /// Wait until one of `members` is leader and all of them follow it.
    pub async fn wait_for_leader(
        &self,
        members: &BTreeSet<MemberId>,
        timeout: Option<Duration>,
        msg: &str,
    ) -> Result<MemberId> {
        let deadline = tokio::time::Instant::now() + timeout.unwrap_or_else(|| Duration::from_millis(500));

        loop {
            let mut leaders = BTreeSet::new();
            let mut has_leader = false;

            for id in members.iter() {
                let m = self.get_metrics(id)?;
                if m.state == ServerState::Leader {
                    has_leader = true;
                }
                leaders.insert(m.current_leader);
            }

            if has_leader && leaders.len() == 1 {
                if let Some(Some(leader)) = leaders.into_iter().next() {
                    tracing::info!("{}: leader is {}", msg, leader);
                    return Ok(leader);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("{}: timeout waiting for a leader of {:?}: {:?}", msg, members, self.latest_metrics());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until every member in `members` has its log end at `append_index`, with everything
    /// up to `commit_index` committed.
    pub async fn wait_for_log(
        &self,
        members: &BTreeSet<MemberId>,
        append_index: LogIndex,
        commit_index: LogIndex,
        timeout: Option<Duration>,
        msg: &str,
    ) -> Result<()> {
        for id in members.iter() {
            let w = self.wait(id, timeout)?;
            w.log(append_index, msg).await?;
            w.commit(commit_index, msg).await?;
        }
        Ok(())
    }

    /// Wait until every member in `members` has `want` as its voting members.
    pub async fn wait_for_members(
        &self,
        members: &BTreeSet<MemberId>,
        want: BTreeSet<MemberId>,
        timeout: Option<Duration>,
        msg: &str,
    ) -> Result<()> {
        for id in members.iter() {
            self.wait(id, timeout)?.members(want.clone(), msg).await?;
        }
        Ok(())
    }

    pub async fn wait_for_state(
        &self,
        members: &BTreeSet<MemberId>,
        want: ServerState,
        timeout: Option<Duration>,
        msg: &str,
    ) -> Result<()> {
        for id in members.iter() {
            self.wait(id, timeout)?.state(want, msg).await?;
        }
        Ok(())
    }

    pub async fn client_write(&self, target: MemberId, data: u64) -> Result<LogIndex, ClientWriteError> {
        let raft = self.get_raft_handle(&target).map_err(|_| ClientWriteError::ForwardToLeader(None))?;
        raft.client_write(data).await
    }

    /// Write `count` values one by one to `target`. Returns the index of the last one.
    pub async fn client_write_many(&self, target: MemberId, start: u64, count: u64) -> Result<LogIndex> {
        let mut last = causal_raft::NO_INDEX;
        for i in start..start + count {
            last = self.client_write(target, i).await?;
        }
        Ok(last)
    }

    /// Collect the values of the normal entries in the log of `id`, in order.
    pub async fn log_values(&self, id: &MemberId) -> Result<Vec<u64>> {
        use causal_raft::log::ReadableRaftLog;
        use causal_raft::ReplicatedContent;

        let member = self.get_member(id)?;
        let log = member.log.read().await;

        let mut values = vec![];
        for item in log.entry_cursor(log.prev_index() + 1)? {
            let (_, entry) = item?;
            if let ReplicatedContent::Normal(v) = entry.content {
                values.push(v);
            }
        }
        Ok(values)
    }

    /// Shut down every member.
    pub async fn shutdown_all(&self) -> Result<()> {
        let members: Vec<_> = {
            let rt = self.routing_table.lock().unwrap();
            rt.values().cloned().collect()
        };
        for m in members {
            m.raft.shutdown().await?;
        }
        Ok(())
    }
}
