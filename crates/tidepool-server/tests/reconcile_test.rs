//! Integration tests for the fetch reconciler against a scripted timeline
//! source: draining, idempotency, the page cap, cursor mismatch, and
//! partial failure.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use tidepool_core::{Account, Error, FetchStatus, NotificationState, Result, StatusId};
use tidepool_db::test_fixtures::{seed_user_with_account, TestDatabase};
use tidepool_server::{
    FetchReconciler, NotificationSnapshot, StreamService, TimelinePage, TimelineSource,
    MAX_FETCH_PAGES,
};

/// Timeline source that replays scripted pages and records the cursors it
/// was sent. Once the script runs out it returns empty pages.
struct ScriptedSource {
    pages: Mutex<VecDeque<Result<TimelinePage>>>,
    sent: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    fn new(pages: Vec<Result<TimelinePage>>) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().collect()),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent_cursors(&self) -> Vec<Option<String>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimelineSource for ScriptedSource {
    async fn home_page(
        &self,
        _account: &Account,
        since: Option<&StatusId>,
        _limit: i64,
    ) -> Result<TimelinePage> {
        self.sent
            .lock()
            .unwrap()
            .push(since.map(|s| s.as_str().to_string()));
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TimelinePage::default()))
    }

    async fn notifications(&self, _account: &Account) -> Result<NotificationSnapshot> {
        Ok(NotificationSnapshot {
            state: NotificationState::Exact,
            count: 2,
        })
    }
}

/// A page of statuses with consecutive ids `first..=last`, continuing at
/// `last`.
fn page(first: u64, last: u64) -> TimelinePage {
    TimelinePage {
        statuses: (first..=last)
            .map(|id| json!({"id": id.to_string(), "content": format!("status {id}")}))
            .collect(),
        echoed_lower_bound: None,
        continuation: Some(StatusId::from(last.to_string())),
    }
}

#[tokio::test]
async fn drain_then_rerun_is_idempotent() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (user_id, _, account_id) = seed_user_with_account(db).await;

    let source = ScriptedSource::new(vec![
        Ok(page(1, 10)),
        Ok(page(11, 15)),
        Ok(TimelinePage::default()),
    ]);
    let account = db.identity.account_by_id(account_id).await.unwrap();
    let outcome = FetchReconciler::new(db, &source)
        .reconcile_account(&account)
        .await
        .unwrap();
    assert_eq!(outcome.fetched, 15);
    assert_eq!(outcome.status, FetchStatus::Done);
    assert_eq!(db.statuses.unadmitted_count(user_id).await.unwrap(), 15);

    // Watermark advanced to the newest committed id.
    let account = db.identity.account_by_id(account_id).await.unwrap();
    assert_eq!(account.last_status_id, Some(StatusId::from("15")));

    // Unchanged remote source: a re-run fetches nothing.
    let source = ScriptedSource::new(vec![Ok(TimelinePage::default())]);
    let outcome = FetchReconciler::new(db, &source)
        .reconcile_account(&account)
        .await
        .unwrap();
    assert_eq!(outcome.fetched, 0);
    assert_eq!(outcome.status, FetchStatus::Done);
    assert_eq!(source.sent_cursors(), vec![Some("15".to_string())]);

    test_db.cleanup().await;
}

#[tokio::test]
async fn echoed_cursor_mismatch_stops_without_commit() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (user_id, _, account_id) = seed_user_with_account(db).await;

    // Establish a watermark first.
    let source = ScriptedSource::new(vec![Ok(page(1, 5)), Ok(TimelinePage::default())]);
    let account = db.identity.account_by_id(account_id).await.unwrap();
    FetchReconciler::new(db, &source)
        .reconcile_account(&account)
        .await
        .unwrap();

    // The server echoes a lower bound that is not the watermark we sent.
    let mismatched = TimelinePage {
        statuses: vec![json!({"id": "6"})],
        echoed_lower_bound: Some(StatusId::from("3")),
        continuation: Some(StatusId::from("6")),
    };
    let source = ScriptedSource::new(vec![Ok(mismatched)]);
    let account = db.identity.account_by_id(account_id).await.unwrap();
    let outcome = FetchReconciler::new(db, &source)
        .reconcile_account(&account)
        .await
        .unwrap();
    assert_eq!(outcome.fetched, 0);

    // Watermark unchanged, nothing committed.
    let account = db.identity.account_by_id(account_id).await.unwrap();
    assert_eq!(account.last_status_id, Some(StatusId::from("5")));
    assert_eq!(db.statuses.unadmitted_count(user_id).await.unwrap(), 5);

    // The next run re-observes the same items without duplication.
    let clean = TimelinePage {
        statuses: vec![json!({"id": "6"})],
        echoed_lower_bound: Some(StatusId::from("5")),
        continuation: None,
    };
    let source = ScriptedSource::new(vec![Ok(clean)]);
    let outcome = FetchReconciler::new(db, &source)
        .reconcile_account(&account)
        .await
        .unwrap();
    assert_eq!(outcome.fetched, 1);
    assert_eq!(db.statuses.unadmitted_count(user_id).await.unwrap(), 6);

    test_db.cleanup().await;
}

#[tokio::test]
async fn page_cap_bounds_the_drain() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (_, _, account_id) = seed_user_with_account(db).await;

    // Backlog deeper than the cap: every page continues with a newer cursor.
    let pages: Vec<Result<TimelinePage>> = (0..MAX_FETCH_PAGES as u64 + 5)
        .map(|i| Ok(page(i * 10 + 1, (i + 1) * 10)))
        .collect();
    let source = ScriptedSource::new(pages);

    let account = db.identity.account_by_id(account_id).await.unwrap();
    let outcome = FetchReconciler::new(db, &source)
        .reconcile_account(&account)
        .await
        .unwrap();

    assert_eq!(source.sent_cursors().len(), MAX_FETCH_PAGES);
    assert_eq!(outcome.fetched, (MAX_FETCH_PAGES as i64) * 10);
    assert_eq!(outcome.status, FetchStatus::More);

    test_db.cleanup().await;
}

#[tokio::test]
async fn failure_mid_drain_keeps_committed_pages() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (user_id, _, account_id) = seed_user_with_account(db).await;

    let source = ScriptedSource::new(vec![
        Ok(page(1, 10)),
        Err(Error::Unavailable("connection reset".to_string())),
    ]);
    let account = db.identity.account_by_id(account_id).await.unwrap();
    let outcome = FetchReconciler::new(db, &source)
        .reconcile_account(&account)
        .await
        .unwrap();

    assert_eq!(outcome.fetched, 10);
    assert_eq!(outcome.status, FetchStatus::More);
    assert_eq!(db.statuses.unadmitted_count(user_id).await.unwrap(), 10);

    // The first page's watermark survived the failure.
    let account = db.identity.account_by_id(account_id).await.unwrap();
    assert_eq!(account.last_status_id, Some(StatusId::from("10")));

    test_db.cleanup().await;
}

#[tokio::test]
async fn service_fetch_updates_stream_info() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;
    let (user_id, stream_id, _) = seed_user_with_account(db).await;

    let source = Arc::new(ScriptedSource::new(vec![
        Ok(page(1, 3)),
        Ok(TimelinePage::default()),
    ]));
    let service = StreamService::new(db.clone(), source);

    let response = service.fetch(user_id, stream_id).await.unwrap();
    assert_eq!(response.fetched_count, 3);
    assert_eq!(response.status, FetchStatus::Done);
    assert_eq!(response.stream_info.remaining_pool, 3);
    assert!(response.stream_info.last_fetch_time.is_some());
    assert_eq!(
        response.stream_info.notification_state,
        NotificationState::Exact
    );
    assert_eq!(response.stream_info.notification_count, 2);

    test_db.cleanup().await;
}
