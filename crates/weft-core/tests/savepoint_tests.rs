//! Savepoint Tests
//!
//! Covers the savepoint stack across heterogeneous participants:
//!
//! 1. Native savepoints go only to participants enlisted since the last checkpoint
//! 2. Rolling back removes later participants entirely
//! 3. The stack truncates to the target, which stays usable
//! 4. Error cases: unknown names, empty names, closed transactions, backend failures

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::*;
use weft_core::{Context, ErrorKind, RepositoryErrorKind};

#[tokio::test]
async fn test_posts_and_blogs_scenario() {
    // GIVEN posts on r1 and blogs on r2
    let f = fixture();
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();

    // WHEN a post is inserted
    tx.insert(&mut scope_with(&f.db, &post(1, "first", None))).await.unwrap();
    // THEN r1 begins
    assert_eq!(f.log.for_repo("r1"), vec!["begin", "insert(posts)"]);

    // WHEN savepoint "first" is taken
    tx.savepoint("first").await.unwrap();
    assert_eq!(f.log.count("r1.savepoint(first)"), 1);
    assert_eq!(tx.savepoints().len(), 1);
    assert_eq!(tx.savepoints()[0].repositories(), vec!["r1"]);

    // WHEN a second post and a blog are inserted
    tx.insert(&mut scope_with(&f.db, &post(2, "second", None))).await.unwrap();
    tx.insert(&mut scope_with(&f.db, &blog(10, "weft"))).await.unwrap();
    assert_eq!(f.log.count("r1.begin"), 1, "r1 must not begin twice");
    assert_eq!(f.log.count("r2.begin"), 1);

    // WHEN savepoint "second" is taken
    tx.savepoint("second").await.unwrap();
    // THEN only r2 receives the native savepoint
    assert_eq!(f.log.count("r2.savepoint(second)"), 1);
    assert_eq!(f.log.count("r1.savepoint(second)"), 0);
    let stack: Vec<(&str, Vec<&str>)> = tx
        .savepoints()
        .iter()
        .map(|s| (s.name(), s.repositories()))
        .collect();
    assert_eq!(stack, vec![("first", vec!["r1"]), ("second", vec!["r1", "r2"])]);

    // WHEN rolling back to "first"
    f.log.clear();
    tx.rollback_savepoint("first").await.unwrap();

    // THEN r2 is rolled back and removed, r1 rolls back to its savepoint
    assert_eq!(f.log.all(), vec!["r2.rollback", "r1.rollback_savepoint(first)"]);
    let participants: Vec<String> = tx.participants().into_iter().map(|p| p.repository).collect();
    assert_eq!(participants, vec!["r1"]);
    assert_eq!(tx.savepoints().len(), 1);
    assert_eq!(tx.savepoints()[0].name(), "first");

    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_rollback_to_first_savepoint_rolls_out_later_participant() {
    // GIVEN A and B enlisted before "s1", C enlisted before "s2"
    let f = triple_fixture();
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();

    tx.insert(&mut scope_with(&f.db, &post(1, "a", None))).await.unwrap();
    tx.insert(&mut scope_with(&f.db, &blog(1, "b"))).await.unwrap();
    tx.savepoint("s1").await.unwrap();
    tx.insert(&mut scope_with(&f.db, &comment(1, 1, "c"))).await.unwrap();
    tx.savepoint("s2").await.unwrap();

    assert_eq!(f.log.for_repo("c"), vec!["begin", "insert(comments)", "savepoint(s2)"]);
    assert_eq!(f.log.count("a.savepoint(s2)"), 0);
    assert_eq!(f.log.count("b.savepoint(s2)"), 0);

    // WHEN rolling back to "s1"
    f.log.clear();
    tx.rollback_savepoint("s1").await.unwrap();

    // THEN C is fully rolled back, A and B roll back to "s1"
    assert_eq!(f.log.for_repo("c"), vec!["rollback"]);
    assert_eq!(f.log.for_repo("a"), vec!["rollback_savepoint(s1)"]);
    assert_eq!(f.log.for_repo("b"), vec!["rollback_savepoint(s1)"]);
    assert_eq!(tx.participants().len(), 2);

    // AND "s2" is gone
    let names: Vec<&str> = tx.savepoints().iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["s1"]);
    let err = tx.rollback_savepoint("s2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SavepointNotFound);

    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_savepoint_then_rollback_restores_participant_set() {
    let f = triple_fixture();
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();
    tx.insert(&mut scope_with(&f.db, &post(1, "a", None))).await.unwrap();
    let before = tx.participants();

    tx.savepoint("x").await.unwrap();
    tx.rollback_savepoint("x").await.unwrap();

    assert_eq!(tx.participants(), before);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_rollback_twice_to_same_savepoint() {
    let f = fixture();
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();
    tx.insert(&mut scope_with(&f.db, &post(1, "a", None))).await.unwrap();
    tx.savepoint("s").await.unwrap();

    tx.rollback_savepoint("s").await.unwrap();
    tx.rollback_savepoint("s").await.unwrap();

    assert_eq!(f.log.count("r1.rollback_savepoint(s)"), 2);
    assert_eq!(tx.savepoints().len(), 1);
    assert_eq!(tx.participants().len(), 1);
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_savepoint_before_any_participant_then_enlist() {
    // GIVEN a savepoint taken with no participants
    let f = fixture();
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();
    tx.savepoint("empty").await.unwrap();
    assert!(tx.savepoints()[0].participants().is_empty());

    // WHEN r1 enlists and we roll back to it
    tx.insert(&mut scope_with(&f.db, &post(1, "a", None))).await.unwrap();
    tx.rollback_savepoint("empty").await.unwrap();

    // THEN r1 was fully rolled back and left the transaction
    assert_eq!(f.log.for_repo("r1"), vec!["begin", "insert(posts)", "rollback"]);
    assert!(tx.participants().is_empty());

    // AND touching r1 again begins a fresh sub-transaction
    tx.insert(&mut scope_with(&f.db, &post(2, "b", None))).await.unwrap();
    assert_eq!(f.log.count("r1.begin"), 2);
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_reenlisted_repository_gets_native_savepoint_again() {
    let f = fixture();
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();
    tx.insert(&mut scope_with(&f.db, &post(1, "a", None))).await.unwrap();
    tx.savepoint("s1").await.unwrap();
    tx.insert(&mut scope_with(&f.db, &blog(1, "b"))).await.unwrap();
    tx.rollback_savepoint("s1").await.unwrap();

    // r2 comes back under a new participant id
    tx.insert(&mut scope_with(&f.db, &blog(2, "c"))).await.unwrap();
    tx.savepoint("s2").await.unwrap();

    assert_eq!(f.log.count("r2.savepoint(s2)"), 1);
    assert_eq!(f.log.count("r1.savepoint(s2)"), 0);
    assert_eq!(tx.savepoints()[1].delta().len(), 1);
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_names_resolve_to_most_recent() {
    let f = fixture();
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();
    tx.insert(&mut scope_with(&f.db, &post(1, "a", None))).await.unwrap();
    tx.savepoint("dup").await.unwrap();
    tx.insert(&mut scope_with(&f.db, &blog(1, "b"))).await.unwrap();
    tx.savepoint("dup").await.unwrap();
    f.log.clear();

    tx.rollback_savepoint("dup").await.unwrap();

    // The newer "dup" already covers r2, so nothing is rolled out
    assert_eq!(tx.savepoints().len(), 2);
    assert_eq!(tx.participants().len(), 2);
    assert_eq!(f.log.all(), vec!["r2.rollback_savepoint(dup)"]);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_rollback_savepoint_without_savepoints_fails() {
    let f = fixture();
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();

    let err = tx.rollback_savepoint("missing").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SavepointNotFound);
    assert_eq!(err.code(), "ERR_SAVEPOINT_NOT_FOUND");
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_empty_savepoint_name_rejected() {
    let f = fixture();
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();

    let err = tx.savepoint("").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(tx.savepoints().is_empty());
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_savepoint_on_closed_transaction_fails() {
    let f = fixture();
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();
    tx.insert(&mut scope_with(&f.db, &post(1, "a", None))).await.unwrap();
    tx.commit().await.unwrap();
    f.log.clear();

    assert_eq!(tx.savepoint("late").await.unwrap_err().kind(), ErrorKind::TransactionClosed);
    assert_eq!(
        tx.rollback_savepoint("late").await.unwrap_err().kind(),
        ErrorKind::TransactionClosed
    );
    assert!(f.log.all().is_empty());
}

#[tokio::test]
async fn test_failed_native_savepoint_is_not_pushed() {
    let f = fixture();
    f.r2.fail_on("savepoint", RepositoryErrorKind::Storage);
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();
    tx.insert(&mut scope_with(&f.db, &post(1, "a", None))).await.unwrap();
    tx.insert(&mut scope_with(&f.db, &blog(1, "b"))).await.unwrap();

    let err = tx.savepoint("s").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Backend);
    assert_eq!(err.repository(), Some("r2"));
    assert!(tx.savepoints().is_empty());
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_failed_rollout_keeps_participant_and_stack() {
    // GIVEN r2 enlisted after "s1" and "s2" on the stack
    let f = fixture();
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();
    tx.insert(&mut scope_with(&f.db, &post(1, "a", None))).await.unwrap();
    tx.savepoint("s1").await.unwrap();
    tx.insert(&mut scope_with(&f.db, &blog(1, "b"))).await.unwrap();
    tx.savepoint("s2").await.unwrap();

    // WHEN r2 fails to roll back
    f.r2.fail_on("rollback", RepositoryErrorKind::Storage);
    let err = tx.rollback_savepoint("s1").await.unwrap_err();

    // THEN the error names r2, r2 stays enlisted and the stack is untouched
    assert_eq!(err.repository(), Some("r2"));
    assert_eq!(tx.participants().len(), 2);
    assert_eq!(tx.savepoints().len(), 2);
    assert_eq!(f.log.count("r1.rollback_savepoint(s1)"), 0);

    f.r2.clear_failures();
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_failure_after_rollout_truncates_stack() {
    // GIVEN "s1" over r1, then r2 enlisted and "s2" over both
    let f = fixture();
    let ctx = Context::background();
    let mut tx = f.db.begin(&ctx, None).await.unwrap();
    tx.insert(&mut scope_with(&f.db, &post(1, "a", None))).await.unwrap();
    tx.savepoint("s1").await.unwrap();
    tx.insert(&mut scope_with(&f.db, &blog(1, "b"))).await.unwrap();
    tx.savepoint("s2").await.unwrap();

    // WHEN r2 rolls out but r1 fails to roll back to "s1"
    f.r1.fail_on("rollback_savepoint", RepositoryErrorKind::Storage);
    let err = tx.rollback_savepoint("s1").await.unwrap_err();

    // THEN the error names r1 and r2 is gone
    assert_eq!(err.repository(), Some("r1"));
    assert_eq!(f.log.count("r2.rollback"), 1);
    let live: Vec<String> = tx.participants().into_iter().map(|p| p.repository).collect();
    assert_eq!(live, vec!["r1"]);

    // AND no checkpoint still lists the rolled out participant
    let names: Vec<&str> = tx.savepoints().iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["s1"]);
    let ids: Vec<_> = tx.participants().into_iter().map(|p| p.id).collect();
    for savepoint in tx.savepoints() {
        assert!(savepoint.participants().iter().all(|e| ids.contains(&e.id)));
    }

    // AND "s1" can be retried once the backend recovers
    f.r1.clear_failures();
    tx.rollback_savepoint("s1").await.unwrap();
    tx.rollback().await.unwrap();
}
