use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use causal_raft::BootstrapError;
use causal_raft::Config;
use causal_raft::MemberId;
use causal_raft::ServerState;
use fixtures::timeout;
use fixtures::RaftRouter;
use maplit::btreeset;
use pretty_assertions::assert_eq;

#[macro_use]
mod fixtures;

/// Single-member cluster initialization test.
///
/// What does this test do?
///
/// - brings 1 member online with an empty log.
/// - asserts that it stays a follower without a leader.
/// - bootstraps the cluster with a membership including just this member.
/// - asserts that it becomes leader and commits the bootstrap entry and its barrier.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_member() -> Result<()> {
    let ut_span = init_ut!();
    let _ent = ut_span.enter();

    let config = Arc::new(fixtures::test_config().validate()?);
    let router = RaftRouter::new(config.clone());
    let member = router.new_raft_node(1).await?;

    let metrics = router.get_metrics(&1)?;
    assert_eq!(ServerState::Follower, metrics.state);
    assert_eq!(causal_raft::NO_INDEX, metrics.append_index);
    assert!(metrics.voting_members.is_empty());

    let res = member.raft.leader();
    assert!(res.is_err(), "no leader before bootstrap");
    assert_eq!(1, member.monitor.leader_not_found_count());

    tracing::info!("--- bootstrap cluster");
    member.raft.bootstrap(btreeset! {1}).await?;

    let leader = router.wait_for_leader(&btreeset! {1}, timeout(), "single member").await?;
    assert_eq!(1, leader);
    assert_eq!(1, member.raft.leader()?);

    // The membership entry at 0 and the barrier of the first leader at 1.
    router.wait_for_log(&btreeset! {1}, 1, 1, timeout(), "bootstrap committed").await?;

    let metrics = router.get_metrics(&1)?;
    assert_eq!(btreeset! {1}, metrics.voting_members);
    assert_eq!(1, metrics.current_term);
    assert_eq!(Some(1), metrics.voted_for);

    router.shutdown_all().await?;
    Ok(())
}

/// A three-member cluster is bootstrapped on one member, the others join with an empty log.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_members() -> Result<()> {
    let ut_span = init_ut!();
    let _ent = ut_span.enter();

    let config = Arc::new(fixtures::test_config().validate()?);
    let router = RaftRouter::new(config.clone());

    let all = btreeset! {1, 2, 3};
    let leader = router.new_cluster(all.clone()).await?;
    assert_eq!(1, leader, "only the bootstrapped member can be elected at first");

    router.wait_for_members(&all, all.clone(), timeout(), "members replicated").await?;
    router.wait_for_log(&all, 1, 1, timeout(), "bootstrap replicated").await?;

    let m = router
        .wait(&1, timeout())?
        .metrics(
            |x| x.replication.as_ref().map(|r| r.len()) == Some(2),
            "replication status of both followers",
        )
        .await?;
    let targets: BTreeSet<MemberId> = m.replication.unwrap_or_default().keys().copied().collect();
    assert_eq!(btreeset! {2, 3}, targets);

    let member = router.get_member(&1)?;
    assert!(member.monitor.processed("vote_response") >= 1);
    assert!(member.monitor.term() >= 1);

    router.shutdown_all().await?;
    Ok(())
}

/// Bootstrapping is refused for an empty member set and for a member that already has a log.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bootstrap_refused() -> Result<()> {
    let ut_span = init_ut!();
    let _ent = ut_span.enter();

    let config = Arc::new(Config::default().validate()?);
    let router = RaftRouter::new(config.clone());
    let member = router.new_raft_node(1).await?;

    let res = member.raft.bootstrap(btreeset! {}).await;
    assert_eq!(Err(BootstrapError::EmptyMembers), res);

    member.raft.bootstrap(btreeset! {1, 2, 3}).await?;

    let res = member.raft.bootstrap(btreeset! {1, 2, 3}).await;
    assert_eq!(Err(BootstrapError::NotEmpty { append_index: 0 }), res);

    member.raft.shutdown().await?;
    Ok(())
}
