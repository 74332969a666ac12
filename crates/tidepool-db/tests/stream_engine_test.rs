//! Integration tests for the stream/position engine: admission order,
//! read-marker semantics, and clearing.

use tidepool_core::{Error, ReadMode, StatusId};
use tidepool_db::test_fixtures::{seed_statuses, seed_user_with_account, TestDatabase};

#[tokio::test]
async fn pick_next_assigns_dense_positions() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (_, stream_id, account_id) = seed_user_with_account(db).await;
    seed_statuses(db, account_id, 100, 5).await;

    let mut positions = Vec::new();
    for _ in 0..5 {
        let item = db.streams.pick_next(stream_id).await.unwrap();
        positions.push(item.position);
    }
    assert_eq!(positions, vec![1, 2, 3, 4, 5]);

    let stream = db.streams.stream_by_id(stream_id).await.unwrap();
    assert_eq!(stream.first_position, 1);
    assert_eq!(stream.last_position, 5);

    test_db.cleanup().await;
}

#[tokio::test]
async fn pick_next_on_drained_pool_is_empty() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (_, stream_id, account_id) = seed_user_with_account(db).await;
    seed_statuses(db, account_id, 1, 1).await;

    db.streams.pick_next(stream_id).await.unwrap();
    match db.streams.pick_next(stream_id).await {
        Err(Error::Empty) => {}
        other => panic!("expected Empty, got {other:?}"),
    }

    test_db.cleanup().await;
}

#[tokio::test]
async fn admission_order_is_numeric_not_lexical() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (_, stream_id, account_id) = seed_user_with_account(db).await;

    for id in ["10", "9"] {
        let sid = StatusId::from(id);
        let payload = serde_json::json!({"id": id});
        db.statuses.insert(account_id, &sid, &payload).await.unwrap();
    }

    let first = db.streams.pick_next(stream_id).await.unwrap();
    let second = db.streams.pick_next(stream_id).await.unwrap();
    assert_eq!(first.status_id.as_str(), "9");
    assert_eq!(second.status_id.as_str(), "10");

    test_db.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pick_next_never_shares_a_position() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (_, stream_id, account_id) = seed_user_with_account(db).await;
    seed_statuses(db, account_id, 1, 8).await;

    // Simultaneous admissions serialize on the stream row lock; a shared
    // position would fail the stream_items primary key and surface here as
    // an error.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let db = test_db.db.clone();
        handles.push(tokio::spawn(
            async move { db.streams.pick_next(stream_id).await },
        ));
    }

    let mut positions = Vec::new();
    for handle in handles {
        let item = handle.await.unwrap().unwrap();
        positions.push(item.position);
    }
    positions.sort_unstable();
    assert_eq!(positions, (1..=8).collect::<Vec<i64>>());

    let stream = db.streams.stream_by_id(stream_id).await.unwrap();
    assert_eq!(stream.first_position, 1);
    assert_eq!(stream.last_position, 8);

    test_db.cleanup().await;
}

#[tokio::test]
async fn pool_insert_is_idempotent() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (user_id, _, account_id) = seed_user_with_account(db).await;

    let sid = StatusId::from("42");
    let payload = serde_json::json!({"id": "42"});
    assert!(db.statuses.insert(account_id, &sid, &payload).await.unwrap());
    assert!(!db.statuses.insert(account_id, &sid, &payload).await.unwrap());
    assert_eq!(db.statuses.unadmitted_count(user_id).await.unwrap(), 1);

    test_db.cleanup().await;
}

#[tokio::test]
async fn set_read_advance_and_absolute() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (_, stream_id, account_id) = seed_user_with_account(db).await;
    seed_statuses(db, account_id, 1, 5).await;
    for _ in 0..5 {
        db.streams.pick_next(stream_id).await.unwrap();
    }

    let stream = db.streams.set_read(stream_id, 2, ReadMode::Advance).await.unwrap();
    assert_eq!(stream.last_read, 2);

    // Regression under ADVANCE is a silent no-op.
    let stream = db.streams.set_read(stream_id, 1, ReadMode::Advance).await.unwrap();
    assert_eq!(stream.last_read, 2);

    let stream = db.streams.set_read(stream_id, 4, ReadMode::Advance).await.unwrap();
    assert_eq!(stream.last_read, 4);

    // ABSOLUTE may move backwards.
    let stream = db.streams.set_read(stream_id, 1, ReadMode::Absolute).await.unwrap();
    assert_eq!(stream.last_read, 1);

    // first_position - 1 marks "nothing read" on a non-empty stream.
    let stream = db.streams.set_read(stream_id, 0, ReadMode::Absolute).await.unwrap();
    assert_eq!(stream.last_read, 0);

    test_db.cleanup().await;
}

#[tokio::test]
async fn set_read_rejects_out_of_range() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (_, stream_id, account_id) = seed_user_with_account(db).await;
    seed_statuses(db, account_id, 1, 3).await;
    for _ in 0..3 {
        db.streams.pick_next(stream_id).await.unwrap();
    }

    match db.streams.set_read(stream_id, 4, ReadMode::Absolute).await {
        Err(Error::InvalidInput(_)) => {}
        other => panic!("expected InvalidInput, got {other:?}"),
    }
    match db.streams.set_read(stream_id, -1, ReadMode::Advance).await {
        Err(Error::InvalidInput(_)) => {}
        other => panic!("expected InvalidInput, got {other:?}"),
    }

    test_db.cleanup().await;
}

#[tokio::test]
async fn clear_returns_items_to_pool() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (user_id, stream_id, account_id) = seed_user_with_account(db).await;
    seed_statuses(db, account_id, 1, 4).await;
    for _ in 0..4 {
        db.streams.pick_next(stream_id).await.unwrap();
    }
    db.streams.set_read(stream_id, 3, ReadMode::Advance).await.unwrap();
    assert_eq!(db.statuses.unadmitted_count(user_id).await.unwrap(), 0);

    let stream = db.streams.clear(stream_id).await.unwrap();
    assert_eq!(stream.first_position, 0);
    assert_eq!(stream.last_position, 0);
    assert_eq!(stream.last_read, 0);

    // Detached statuses are unadmitted again.
    assert_eq!(db.statuses.unadmitted_count(user_id).await.unwrap(), 4);

    test_db.cleanup().await;
}

#[tokio::test]
async fn reblog_of_admitted_source_is_already_seen() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (_, stream_id, account_id) = seed_user_with_account(db).await;

    let original = serde_json::json!({"id": "1", "content": "hello"});
    db.statuses
        .insert(account_id, &StatusId::from("1"), &original)
        .await
        .unwrap();
    let reblog = serde_json::json!({"id": "2", "reblog": {"id": "1", "content": "hello"}});
    db.statuses
        .insert(account_id, &StatusId::from("2"), &reblog)
        .await
        .unwrap();

    let first = db.streams.pick_next(stream_id).await.unwrap();
    assert!(!first.already_seen);
    let second = db.streams.pick_next(stream_id).await.unwrap();
    assert!(second.already_seen);

    test_db.cleanup().await;
}

#[tokio::test]
async fn search_finds_status_with_position() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (user_id, stream_id, account_id) = seed_user_with_account(db).await;
    seed_statuses(db, account_id, 1, 2).await;

    // Unadmitted: found without a position.
    let results = db.statuses.lookup(user_id, &StatusId::from("1")).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].position, None);

    db.streams.pick_next(stream_id).await.unwrap();
    let results = db.statuses.lookup(user_id, &StatusId::from("1")).await.unwrap();
    assert_eq!(results[0].position, Some(1));

    // Unknown id: empty result, not an error.
    let results = db.statuses.lookup(user_id, &StatusId::from("999")).await.unwrap();
    assert!(results.is_empty());

    test_db.cleanup().await;
}
