use std::time::Duration;

use maplit::btreeset;
use pretty_assertions::assert_eq;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::metrics::RaftMetrics;
use crate::metrics::ServerState;
use crate::metrics::Wait;
use crate::metrics::WaitError;

fn waiter(timeout_ms: u64) -> (Wait, watch::Sender<RaftMetrics>) {
    let (tx, rx) = watch::channel(RaftMetrics::new_initial(5));
    let w = Wait {
        timeout: Duration::from_millis(timeout_ms),
        rx,
    };
    (w, tx)
}

/// Publish an update of the initial metrics a little later, from another task.
fn publish_later(tx: watch::Sender<RaftMetrics>, f: impl FnOnce(&mut RaftMetrics) + Send + 'static) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut m = tx.borrow().clone();
        f(&mut m);
        let _ = tx.send(m);

        // Keep the channel open for the waiter.
        tokio::time::sleep(Duration::from_millis(200)).await;
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_wait_for_leader_and_state() -> anyhow::Result<()> {
    let (w, tx) = waiter(500);
    let h = publish_later(tx, |m| {
        m.state = ServerState::Leader;
        m.current_leader = Some(5);
    });

    let got = w.leader(5, "leader").await?;
    assert_eq!(Some(5), got.current_leader);

    let got = w.state(ServerState::Leader, "state").await?;
    assert_eq!(ServerState::Leader, got.state);

    h.await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_wait_for_log_commit_and_members() -> anyhow::Result<()> {
    let (w, tx) = waiter(500);
    let h = publish_later(tx, |m| {
        m.append_index = 7;
        m.commit_index = 4;
        m.voting_members = btreeset! {5, 6};
    });

    let got = w.log(7, "log").await?;
    assert_eq!(7, got.append_index);

    // Any commit index at or beyond the wanted one satisfies the wait.
    let got = w.commit(3, "commit").await?;
    assert_eq!(4, got.commit_index);

    let got = w.members(btreeset! {5, 6}, "members").await?;
    assert_eq!(btreeset! {5, 6}, got.voting_members);

    h.await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_wait_already_satisfied() -> anyhow::Result<()> {
    let (w, _tx) = waiter(10);

    let got = w.state(ServerState::Follower, "initial state").await?;
    assert_eq!(5, got.id);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_wait_timeout() -> anyhow::Result<()> {
    let (w, _tx) = waiter(50);

    let res = w.log(100, "never").await;
    match res {
        Err(WaitError::Timeout(d, msg)) => {
            assert_eq!(Duration::from_millis(50), d);
            assert!(msg.starts_with("never"), "got: {}", msg);
        }
        other => panic!("expect timeout, got: {:?}", other),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_wait_raft_gone() -> anyhow::Result<()> {
    let (w, tx) = waiter(1_000);
    drop(tx);

    let res = w.leader(5, "no sender").await;
    assert!(matches!(res, Err(WaitError::ShuttingDown)));
    Ok(())
}
