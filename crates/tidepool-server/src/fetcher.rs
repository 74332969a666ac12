//! Fetch reconciler: drives convergence against the remote cursor-paginated
//! timeline API.
//!
//! One watermark is kept per account (the newest remote status id seen).
//! Each reconciliation call drains up to [`MAX_FETCH_PAGES`] pages; every
//! page is committed in its own transaction together with the watermark
//! advance, so a failure mid-page never moves the watermark. Cancellation
//! (dropping the future) rolls the in-flight transaction back.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use tidepool_core::{Account, Error, FetchStatus, NotificationState, Result, StatusId};
use tidepool_db::Database;

/// Hard cap on timeline pages drained per fetch call.
///
/// Deliberate backpressure control: an unbounded loop would starve other
/// work under a large backlog.
pub const MAX_FETCH_PAGES: usize = 10;

/// Statuses requested per timeline page.
pub const FETCH_PAGE_LIMIT: i64 = 40;

/// One page of the remote home timeline.
#[derive(Debug, Clone, Default)]
pub struct TimelinePage {
    /// Raw status payloads, each carrying an `id` field.
    pub statuses: Vec<JsonValue>,
    /// The lower-bound cursor the server echoed back for this page.
    pub echoed_lower_bound: Option<StatusId>,
    /// Continuation cursor for the next page, absent at the end of history.
    pub continuation: Option<StatusId>,
}

/// Best-effort notification snapshot from the remote server.
#[derive(Debug, Clone, Copy)]
pub struct NotificationSnapshot {
    pub state: NotificationState,
    pub count: i64,
}

/// The remote timeline service, as consumed by the reconciler.
#[async_trait]
pub trait TimelineSource: Send + Sync {
    /// Fetch a page of home-timeline statuses strictly newer than `since`.
    async fn home_page(
        &self,
        account: &Account,
        since: Option<&StatusId>,
        limit: i64,
    ) -> Result<TimelinePage>;

    /// Snapshot of pending notifications for the account.
    async fn notifications(&self, account: &Account) -> Result<NotificationSnapshot>;
}

/// What to do with a fetched page. Pure decision, separated from the
/// commit machinery so the stop conditions are testable in isolation.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PageDecision {
    /// Commit the page; `newest` is the watermark candidate.
    Commit { newest: StatusId },
    /// End of available history.
    StopEmpty,
    /// The server echoed a different lower bound than we sent. Ambiguous
    /// state: stop without committing rather than risk gaps or loops.
    StopMismatch,
}

pub(crate) fn evaluate_page(sent: Option<&StatusId>, page: &TimelinePage) -> PageDecision {
    if let (Some(sent), Some(echoed)) = (sent, page.echoed_lower_bound.as_ref()) {
        if echoed != sent {
            return PageDecision::StopMismatch;
        }
    }
    match newest_status_id(&page.statuses) {
        Some(newest) => PageDecision::Commit { newest },
        None => PageDecision::StopEmpty,
    }
}

/// Numerically largest status id in a page. Items missing an `id` are
/// skipped.
pub(crate) fn newest_status_id(statuses: &[JsonValue]) -> Option<StatusId> {
    statuses
        .iter()
        .filter_map(|s| s.get("id").and_then(|id| id.as_str()))
        .map(StatusId::from)
        .max()
}

/// Should the loop continue after a committed page?
pub(crate) fn continuation_exhausted(
    sent: Option<&StatusId>,
    continuation: Option<&StatusId>,
) -> bool {
    match continuation {
        None => true,
        Some(c) => sent == Some(c),
    }
}

/// Result of reconciling one account.
#[derive(Debug, Clone, Copy)]
pub struct AccountFetch {
    /// Newly discovered statuses committed to the pool.
    pub fetched: i64,
    pub status: FetchStatus,
}

/// Drives repeated timeline fetches and feeds new statuses into the pool.
pub struct FetchReconciler<'a> {
    db: &'a Database,
    source: &'a dyn TimelineSource,
}

impl<'a> FetchReconciler<'a> {
    pub fn new(db: &'a Database, source: &'a dyn TimelineSource) -> Self {
        Self { db, source }
    }

    /// Drain up to [`MAX_FETCH_PAGES`] pages for one account.
    ///
    /// Per-page remote failures stop the loop but are not fatal: the count
    /// of statuses already committed is returned with a `More` hint.
    pub async fn reconcile_account(&self, account: &Account) -> Result<AccountFetch> {
        let start = Instant::now();
        let mut watermark = account.last_status_id.clone();
        let mut fetched: i64 = 0;
        let mut status = FetchStatus::More;

        for page_idx in 0..MAX_FETCH_PAGES {
            let page = match self
                .source
                .home_page(account, watermark.as_ref(), FETCH_PAGE_LIMIT)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(
                        subsystem = "fetcher",
                        component = "reconciler",
                        account_id = %account.id,
                        page = page_idx,
                        error = %e,
                        "Timeline fetch failed; keeping progress up to last committed page"
                    );
                    return Ok(AccountFetch {
                        fetched,
                        status: FetchStatus::More,
                    });
                }
            };

            match evaluate_page(watermark.as_ref(), &page) {
                PageDecision::StopEmpty => {
                    status = FetchStatus::Done;
                    break;
                }
                PageDecision::StopMismatch => {
                    warn!(
                        subsystem = "fetcher",
                        component = "reconciler",
                        account_id = %account.id,
                        page = page_idx,
                        sent = watermark.as_ref().map(|w| w.as_str()).unwrap_or(""),
                        echoed = page
                            .echoed_lower_bound
                            .as_ref()
                            .map(|e| e.as_str())
                            .unwrap_or(""),
                        "Echoed cursor does not match watermark; stopping without commit"
                    );
                    status = FetchStatus::More;
                    break;
                }
                PageDecision::Commit { newest } => {
                    fetched += self
                        .commit_page(account, watermark.as_ref(), &page.statuses, &newest)
                        .await?;
                    let exhausted =
                        continuation_exhausted(watermark.as_ref(), page.continuation.as_ref());
                    watermark = Some(match watermark {
                        Some(w) => w.max(newest),
                        None => newest,
                    });
                    if exhausted {
                        status = FetchStatus::Done;
                        break;
                    }
                }
            }
        }

        debug!(
            subsystem = "fetcher",
            component = "reconciler",
            op = "reconcile_account",
            account_id = %account.id,
            result_count = fetched,
            duration_ms = start.elapsed().as_millis() as u64,
            "Account reconciliation finished"
        );

        Ok(AccountFetch { fetched, status })
    }

    /// Insert a whole page and advance the watermark in one transaction.
    /// Partial pages are never partially committed.
    async fn commit_page(
        &self,
        account: &Account,
        current: Option<&StatusId>,
        statuses: &[JsonValue],
        newest: &StatusId,
    ) -> Result<i64> {
        let mut tx = self.db.pool.begin().await.map_err(Error::Database)?;

        let mut inserted = 0;
        for status in statuses {
            let Some(id) = status.get("id").and_then(|id| id.as_str()) else {
                continue;
            };
            let sid = StatusId::from(id);
            if self
                .db
                .statuses
                .insert_tx(&mut tx, account.id, &sid, status)
                .await?
            {
                inserted += 1;
            }
        }

        let advanced = match current {
            Some(current) => newest > current,
            None => true,
        };
        if advanced {
            self.db
                .identity
                .set_last_status_id_tx(&mut tx, account.id, newest)
                .await?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(inserted)
    }

    /// Refresh notification bookkeeping for a stream. Failures are logged
    /// and swallowed; this never blocks stream reads.
    pub async fn refresh_notifications(&self, account: &Account, stream_id: uuid::Uuid) {
        match self.source.notifications(account).await {
            Ok(snapshot) => {
                if let Err(e) = self
                    .db
                    .streams
                    .update_notifications(stream_id, snapshot.state, snapshot.count)
                    .await
                {
                    debug!(
                        subsystem = "fetcher",
                        component = "reconciler",
                        stream_id = %stream_id,
                        error = %e,
                        "Failed to persist notification snapshot"
                    );
                }
            }
            Err(e) => {
                debug!(
                    subsystem = "fetcher",
                    component = "reconciler",
                    account_id = %account.id,
                    error = %e,
                    "Notification snapshot unavailable"
                );
            }
        }
    }
}
