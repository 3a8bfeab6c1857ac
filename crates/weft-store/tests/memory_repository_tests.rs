//! Memory Repository Tests
//!
//! Runs the backend behaviour suite against `MemoryRepository`, plus the
//! conflict detection only the in-process backend performs.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::*;
use weft_core::{Context, RepositoryErrorKind};

#[tokio::test]
async fn test_memory_crud() {
    check_crud(&memory_db()).await;
}

#[tokio::test]
async fn test_memory_integer_keys() {
    check_keys(&memory_db()).await;
}

#[tokio::test]
async fn test_memory_queries() {
    check_queries(&memory_db()).await;
}

#[tokio::test]
async fn test_memory_savepoints() {
    check_savepoints(&memory_db()).await;
}

#[tokio::test]
async fn test_memory_isolation() {
    check_isolation(&memory_db()).await;
}

#[tokio::test]
async fn test_memory_concurrent_writers_conflict() {
    // GIVEN two open transactions writing the same collection
    let db = memory_db();
    let ctx = Context::background();
    let mut first = db.begin(&ctx, None).await.unwrap();
    let mut second = db.begin(&ctx, None).await.unwrap();
    first.insert(&mut author(&db, 1, "Le Guin")).await.unwrap();
    second.insert(&mut author(&db, 2, "Herbert")).await.unwrap();

    // WHEN both commit
    first.commit().await.unwrap();
    let err = second.commit().await.unwrap_err();

    // THEN the later one fails and only the first write is visible
    assert_eq!(backend_kind(&err), Some(RepositoryErrorKind::Conflict));
    assert_eq!(err.repository(), Some("mem"));
    let mut all = scope(&db, "authors");
    db.list(&ctx, &mut all).await.unwrap();
    assert_eq!(all.values().len(), 1);
}

#[tokio::test]
async fn test_memory_reads_see_own_writes_only() {
    // GIVEN an uncommitted insert
    let db = memory_db();
    let ctx = Context::background();
    let mut tx = db.begin(&ctx, None).await.unwrap();
    tx.insert(&mut author(&db, 1, "Le Guin")).await.unwrap();

    // THEN the transaction sees it and an outside read does not
    assert_eq!(tx.count(&scope(&db, "authors")).await.unwrap(), 1);
    assert_eq!(db.count(&ctx, &scope(&db, "authors")).await.unwrap(), 0);

    tx.commit().await.unwrap();
    assert_eq!(db.count(&ctx, &scope(&db, "authors")).await.unwrap(), 1);
}
