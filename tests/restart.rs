use std::sync::Arc;

use anyhow::Result;
use causal_raft::state::RaftStores;
use causal_raft::ServerState;
use fixtures::timeout;
use fixtures::RaftRouter;
use maplit::btreeset;
use pretty_assertions::assert_eq;

#[macro_use]
mod fixtures;

/// Term, vote and membership survive a restart with file backed stores.
///
/// What does this test do?
///
/// - bootstrap a single-member cluster with its stores in a temp dir and write some data.
/// - shut it down and start a new raft task on the same log and the same dir.
/// - asserts that the recovered member has the term, vote and voters it had before, and at
///   least its committed membership entry committed.
/// - tell it what the application applied before, and asserts that the commit index is back
///   where it was.
/// - asserts that after recovery it is elected again, in a later term, and keeps its log.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_with_file_stores() -> Result<()> {
    let ut_span = init_ut!();
    let _ent = ut_span.enter();

    let dir = tempfile::tempdir()?;

    let config = Arc::new(fixtures::test_config().validate()?);
    let router = RaftRouter::new(config.clone());

    let log = Arc::new(tokio::sync::RwLock::new(causal_raft::log::InMemoryRaftLog::new()));
    let member = router.new_raft_node_with(1, log.clone(), RaftStores::in_dir(dir.path())).await?;
    member.raft.bootstrap(btreeset! {1}).await?;
    router.wait_for_leader(&btreeset! {1}, timeout(), "first run").await?;

    let idx = router.client_write_many(1, 0, 5).await?;
    router.wait_for_log(&btreeset! {1}, idx, idx, timeout(), "written").await?;

    let before = router.get_metrics(&1)?;
    member.raft.shutdown().await?;

    tracing::info!("--- restart member 1");
    let member = router.spawn_member(1, log, RaftStores::in_dir(dir.path()));

    let recovered = member
        .raft
        .wait(timeout())
        .metrics(|x| x.current_term == before.current_term, "term recovered")
        .await?;
    assert_eq!(ServerState::Follower, recovered.state);
    assert_eq!(before.voted_for, recovered.voted_for);
    assert_eq!(btreeset! {1}, recovered.voting_members);
    assert_eq!(idx, recovered.append_index);
    assert!(recovered.commit_index >= 0, "the bootstrap membership entry is committed");

    let restored = member.raft.restore_commit_index(before.commit_index).await?;
    assert_eq!(before.commit_index, restored);

    let m = router.get_metrics(&1)?;
    assert!(
        m.commit_index >= before.commit_index,
        "commit index went back: {} < {}",
        m.commit_index,
        before.commit_index
    );

    // Beyond the log is capped, and nothing goes back.
    assert_eq!(idx, member.raft.restore_commit_index(idx + 10).await?);
    assert_eq!(idx, member.raft.restore_commit_index(0).await?);

    member.raft.post_recovery_actions().await?;
    member.raft.wait(timeout()).state(ServerState::Leader, "elected again").await?;

    let m = router.get_metrics(&1)?;
    assert!(m.current_term > before.current_term);
    assert!(m.commit_index >= before.commit_index);
    assert_eq!((0..5).collect::<Vec<u64>>(), router.log_values(&1).await?);

    let idx2 = router.client_write(1, 5).await?;
    assert!(idx2 > idx);

    router.shutdown_all().await?;
    Ok(())
}
