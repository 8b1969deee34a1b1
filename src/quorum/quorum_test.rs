use maplit::btreemap;
use maplit::btreeset;

use crate::quorum::is_quorum;
use crate::quorum::is_quorum_of;
use crate::quorum::quorum_match_index;

#[test]
fn test_is_quorum_majority_table() {
    // (cluster_size, minimum votes excluding self)
    let table = [(1, 0), (2, 1), (3, 1), (4, 2), (5, 2)];

    for (size, min_votes) in table {
        for votes in 0..size {
            let want = votes >= min_votes;
            assert_eq!(want, is_quorum(0, size, votes), "size: {}, votes: {}", size, votes);
        }
    }
}

#[test]
fn test_is_quorum_min_size() {
    assert!(is_quorum(0, 5, 2));
    assert!(!is_quorum(0, 5, 1));
    assert!(!is_quorum(2, 1, 0));

    assert!(is_quorum(3, 3, 1));
    assert!(!is_quorum(4, 3, 2));
}

#[test]
fn test_is_quorum_of() {
    let voting = btreeset! {1,2,3};

    assert!(!is_quorum_of(0, &voting, 1, &btreeset! {}));
    assert!(is_quorum_of(0, &voting, 1, &btreeset! {2}));

    tracing::info!("--- own vote and non-members are not counted");
    assert!(!is_quorum_of(0, &voting, 1, &btreeset! {1, 7, 8}));
}

#[test]
fn test_quorum_match_index() {
    let voting = btreeset! {1,2,3};

    tracing::info!("--- single member commits its own log");
    assert_eq!(Some(5), quorum_match_index(0, &btreeset! {1}, 1, 5, &btreemap! {}));

    tracing::info!("--- nobody replicated anything");
    assert_eq!(None, quorum_match_index(0, &voting, 1, 5, &btreemap! {2=>-1, 3=>-1}));

    assert_eq!(Some(3), quorum_match_index(0, &voting, 1, 5, &btreemap! {2=>3, 3=>1}));
    assert_eq!(Some(5), quorum_match_index(0, &voting, 1, 5, &btreemap! {2=>7, 3=>1}));

    tracing::info!("--- a non-voting follower does not count");
    assert_eq!(Some(1), quorum_match_index(0, &voting, 1, 5, &btreemap! {2=>1, 4=>5}));

    let five = btreeset! {1,2,3,4,5};
    assert_eq!(Some(2), quorum_match_index(0, &five, 1, 9, &btreemap! {2=>9, 3=>2, 4=>1, 5=>-1}));
}
