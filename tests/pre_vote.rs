use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use causal_raft::state::MembershipEntry;
use causal_raft::state::RaftCoreState;
use causal_raft::Config;
use causal_raft::MemberId;
use causal_raft::ServerState;
use fixtures::timeout;
use fixtures::RaftRouter;
use maplit::btreeset;
use pretty_assertions::assert_eq;

#[macro_use]
mod fixtures;

/// Bootstrap `members` on the first one and seed the others with the state of the bootstrap
/// entry, so that every member is a voter from the start.
async fn seeded_cluster(router: &RaftRouter, members: &BTreeSet<MemberId>) -> Result<MemberId> {
    let mut ids = members.iter().copied();
    let first = ids.next().unwrap();

    router.new_raft_node(first).await?.raft.bootstrap(members.clone()).await?;

    for id in ids {
        let m = router.new_raft_node(id).await?;
        let core_state = RaftCoreState {
            prev_index: 0,
            prev_term: 0,
            ..RaftCoreState::new(MembershipEntry::new(0, members.clone()))
        };
        m.raft.install_core_state(core_state).await?;
    }

    router.wait_for_leader(members, timeout(), "seeded cluster").await
}

/// With pre-voting an isolated member does not disturb the cluster when it comes back.
///
/// What does this test do?
///
/// - create a 3-member cluster with pre-voting where every member is a voter from the start.
/// - isolate a follower until it has lost its leader and asks for pre-votes.
/// - asserts that its term does not change while it gets no pre-votes.
/// - restore it and asserts that the leader and term stay the same.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pre_vote_keeps_term_of_isolated_member() -> Result<()> {
    let ut_span = init_ut!();
    let _ent = ut_span.enter();

    let config = Arc::new(
        Config {
            enable_pre_voting: true,
            ..fixtures::test_config()
        }
        .validate()?,
    );
    let router = RaftRouter::new(config.clone());

    let all = btreeset! {1, 2, 3};
    let leader = seeded_cluster(&router, &all).await?;
    let term = router.get_metrics(&leader)?.current_term;
    assert!(term >= 1);

    let isolated = *all.iter().find(|id| **id != leader).unwrap();

    tracing::info!("--- isolate follower {}", isolated);
    router.isolate_node(isolated);

    router
        .wait(&isolated, timeout())?
        .metrics(|x| x.pre_election, "lost the leader, asking for pre-votes")
        .await?;

    tokio::time::sleep(Duration::from_millis(config.election_timeout * 4)).await;

    let m = router.get_metrics(&isolated)?;
    assert_eq!(ServerState::Follower, m.state);
    assert_eq!(term, m.current_term, "pre-votes never granted, term unchanged");
    assert_eq!(None, m.current_leader);

    tracing::info!("--- restore follower {}", isolated);
    router.restore_node(isolated);

    router.wait(&isolated, timeout())?.leader(leader, "follow the leader again").await?;

    let m = router.get_metrics(&leader)?;
    assert_eq!(ServerState::Leader, m.state);
    assert_eq!(term, m.current_term);
    assert!(!router.get_metrics(&isolated)?.pre_election);

    router.shutdown_all().await?;
    Ok(())
}

/// A member seeded with the state of the cluster continues the log after `prev_index`.
///
/// What does this test do?
///
/// - bootstrap a single-member cluster and write some data.
/// - bring a second member online and install the leader's state at its commit index.
/// - add it to the cluster and asserts that only the entries after `prev_index` are shipped.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn install_core_state_skips_log() -> Result<()> {
    let ut_span = init_ut!();
    let _ent = ut_span.enter();

    let config = Arc::new(fixtures::test_config().validate()?);
    let router = RaftRouter::new(config.clone());

    let leader = router.new_cluster(btreeset! {1}).await?;
    assert_eq!(1, leader);

    let idx = router.client_write_many(1, 0, 10).await?;
    router.wait_for_log(&btreeset! {1}, idx, idx, timeout(), "written").await?;

    let m1 = router.get_metrics(&1)?;
    let core_state = RaftCoreState {
        prev_index: idx,
        prev_term: m1.current_term,
        ..RaftCoreState::new(MembershipEntry::new(0, btreeset! {1}))
    };

    let m2 = router.new_raft_node(2).await?;
    m2.raft.install_core_state(core_state).await?;

    let got = router.get_metrics(&2)?;
    assert_eq!(idx, got.prev_index);
    assert_eq!(idx, got.append_index);
    assert_eq!(idx, got.commit_index);
    assert_eq!(btreeset! {1}, got.voting_members);

    router.get_raft_handle(&1)?.set_target_membership_set(btreeset! {1, 2}).await?;
    router.wait_for_members(&btreeset! {1, 2}, btreeset! {1, 2}, timeout(), "2 joined").await?;

    let idx = router.client_write_many(1, 10, 3).await?;
    router.wait_for_log(&btreeset! {1, 2}, idx, idx, timeout(), "written to both").await?;

    assert_eq!(vec![10, 11, 12], router.log_values(&2).await?);

    router.shutdown_all().await?;
    Ok(())
}
