//! Stream service: the RPC surface over the database layer.
//!
//! Session handling lives outside this crate; every method takes the
//! resolved user id explicitly and verifies stream ownership against it.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use tidepool_core::{
    Error, FetchResponse, FetchStatus, ListRequest, ListResponse, ReadMode, Result, SearchResult,
    StatusId, Stream, StreamInfo, UserSettings,
};
use tidepool_db::Database;

use crate::fetcher::{FetchReconciler, TimelineSource};

/// Service implementing the List/SetRead/Fetch/Search methods.
#[derive(Clone)]
pub struct StreamService {
    db: Database,
    source: Arc<dyn TimelineSource>,
}

impl StreamService {
    pub fn new(db: Database, source: Arc<dyn TimelineSource>) -> Self {
        Self { db, source }
    }

    /// Cursor-based listing over the user's stream.
    pub async fn list(&self, user_id: Uuid, req: ListRequest) -> Result<ListResponse> {
        let start = Instant::now();
        let user = self.db.identity.user_by_id(user_id).await?;
        self.owned_stream(user_id, req.stream_id).await?;

        let page_size = UserSettings::from_json(&user.settings).list_count();
        let response = self
            .db
            .streams
            .list(req.stream_id, req.direction, req.position, page_size)
            .await?;

        info!(
            subsystem = "server",
            component = "service",
            op = "list",
            stream_id = %req.stream_id,
            result_count = response.items.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Listed stream window"
        );
        Ok(response)
    }

    /// Update the persisted read marker.
    pub async fn set_read(
        &self,
        user_id: Uuid,
        stream_id: Uuid,
        last_read: i64,
        mode: ReadMode,
    ) -> Result<StreamInfo> {
        self.owned_stream(user_id, stream_id).await?;
        self.db.streams.set_read(stream_id, last_read, mode).await?;
        self.db.streams.stream_info(stream_id).await
    }

    /// Reconcile all of the user's accounts against their remote timelines.
    pub async fn fetch(&self, user_id: Uuid, stream_id: Uuid) -> Result<FetchResponse> {
        let start = Instant::now();
        self.owned_stream(user_id, stream_id).await?;
        let accounts = self.db.identity.accounts_for_user(user_id).await?;

        let reconciler = FetchReconciler::new(&self.db, self.source.as_ref());
        let mut fetched: i64 = 0;
        let mut status = FetchStatus::Done;
        for account in &accounts {
            let outcome = reconciler.reconcile_account(account).await?;
            fetched += outcome.fetched;
            if outcome.status == FetchStatus::More {
                status = FetchStatus::More;
            }
        }

        self.db.streams.touch_fetch_time(stream_id, Utc::now()).await?;
        if let Some(account) = accounts.first() {
            reconciler.refresh_notifications(account, stream_id).await;
        }

        info!(
            subsystem = "server",
            component = "service",
            op = "fetch",
            stream_id = %stream_id,
            result_count = fetched,
            duration_ms = start.elapsed().as_millis() as u64,
            "Fetch reconciliation finished"
        );

        Ok(FetchResponse {
            stream_info: self.db.streams.stream_info(stream_id).await?,
            fetched_count: fetched,
            status,
        })
    }

    /// Point lookup of a status by its remote id.
    pub async fn search(&self, user_id: Uuid, status_id: &StatusId) -> Result<Vec<SearchResult>> {
        self.db.identity.user_by_id(user_id).await?;
        self.db.statuses.lookup(user_id, status_id).await
    }

    /// Counter snapshot for a stream the user owns.
    pub async fn stream_info(&self, user_id: Uuid, stream_id: Uuid) -> Result<StreamInfo> {
        self.owned_stream(user_id, stream_id).await?;
        self.db.streams.stream_info(stream_id).await
    }

    /// A stream another user owns is indistinguishable from a missing one.
    async fn owned_stream(&self, user_id: Uuid, stream_id: Uuid) -> Result<Stream> {
        let stream = self.db.streams.stream_by_id(stream_id).await?;
        if stream.user_id != user_id {
            return Err(Error::NotFound(format!("stream {stream_id}")));
        }
        Ok(stream)
    }
}
