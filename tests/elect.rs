use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use causal_raft::MemberId;
use causal_raft::ServerState;
use fixtures::timeout;
use fixtures::RaftRouter;
use maplit::btreeset;
use pretty_assertions::assert_eq;

#[macro_use]
mod fixtures;

/// Re-elect after the leader is lost.
///
/// What does this test do?
///
/// - create a stable 3-member cluster.
/// - isolate the leader.
/// - asserts that the other two elect a new leader in a later term and keep committing.
/// - restore the old leader and asserts that it follows the new one.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn elect_after_leader_lost() -> Result<()> {
    let ut_span = init_ut!();
    let _ent = ut_span.enter();

    let config = Arc::new(fixtures::test_config().validate()?);
    let router = RaftRouter::new(config.clone());

    let all = btreeset! {1, 2, 3};
    let old_leader = router.new_cluster(all.clone()).await?;
    router.wait_for_log(&all, 1, 1, timeout(), "bootstrap replicated").await?;
    let old_term = router.get_metrics(&old_leader)?.current_term;

    tracing::info!("--- isolate leader {}", old_leader);
    router.isolate_node(old_leader);

    let rest: BTreeSet<MemberId> = all.iter().copied().filter(|id| *id != old_leader).collect();
    let new_leader = router.wait_for_leader(&rest, timeout(), "re-elected").await?;
    assert_ne!(old_leader, new_leader);

    let m = router.get_metrics(&new_leader)?;
    assert!(m.current_term > old_term, "new term {} > {}", m.current_term, old_term);

    let idx = router.client_write_many(new_leader, 0, 10).await?;
    router.wait_for_log(&rest, idx, idx, timeout(), "written to the new leader").await?;

    tracing::info!("--- restore {}", old_leader);
    router.restore_node(old_leader);

    let leader = router.wait_for_leader(&all, timeout(), "old leader rejoined").await?;
    let idx = router.client_write_many(leader, 10, 1).await?;
    router.wait_for_log(&all, idx, idx, timeout(), "all members caught up").await?;

    let m = router.get_metrics(&old_leader)?;
    assert_eq!(ServerState::Follower, m.state);
    assert_eq!(Some(leader), m.current_leader);

    let want: Vec<u64> = (0..11).collect();
    assert_eq!(want, router.log_values(&old_leader).await?);

    router.shutdown_all().await?;
    Ok(())
}

/// A member that refuses to be leader never runs an election, but still votes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refuse_to_be_leader() -> Result<()> {
    let ut_span = init_ut!();
    let _ent = ut_span.enter();

    let config = Arc::new(
        causal_raft::Config {
            refuse_to_be_leader: true,
            ..fixtures::test_config()
        }
        .validate()?,
    );
    let router = RaftRouter::new(config.clone());
    let member = router.new_raft_node(1).await?;
    member.raft.bootstrap(btreeset! {1}).await?;

    tokio::time::sleep(config.new_rand_election_timeout() * 3).await;

    let m = router.get_metrics(&1)?;
    assert_eq!(ServerState::Follower, m.state);
    assert_eq!(0, m.current_term);
    assert_eq!(None, m.current_leader);

    router.shutdown_all().await?;
    Ok(())
}
