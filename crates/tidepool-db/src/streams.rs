//! Stream/position engine and pagination queries.
//!
//! A stream is a dense sequence of positions 1..=last_position over admitted
//! statuses. Admission moves the oldest unadmitted status of the owning
//! user into the next position. All position assignment happens inside one
//! transaction holding a `FOR UPDATE` lock on the stream row, so concurrent
//! callers can never observe the same "next position" value; different
//! streams do not contend.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use tidepool_core::{
    Error, ListDirection, ListResponse, NotificationState, ReadMode, Result, StatusId, Stream,
    StreamInfo, StreamStatus,
};

/// PostgreSQL implementation of the stream engine.
#[derive(Clone)]
pub struct PgStreamRepository {
    pool: Pool<Postgres>,
}

impl PgStreamRepository {
    /// Create a new PgStreamRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    // =========================================================================
    // STREAM STATE
    // =========================================================================

    /// Get a stream by id, failing with `NotFound` on a miss.
    pub async fn stream_by_id(&self, stream_id: Uuid) -> Result<Stream> {
        let row = sqlx::query(&select_stream_sql(false))
            .bind(stream_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("stream {stream_id}")))?;

        Ok(parse_stream_row(row))
    }

    /// Lock a stream row for the duration of a transaction.
    ///
    /// Serializes position assignment against concurrent admission on the
    /// same stream.
    pub async fn lock_stream_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream_id: Uuid,
    ) -> Result<Stream> {
        let row = sqlx::query(&select_stream_sql(true))
            .bind(stream_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("stream {stream_id}")))?;

        Ok(parse_stream_row(row))
    }

    /// Counter snapshot plus the live unadmitted-pool count.
    pub async fn stream_info(&self, stream_id: Uuid) -> Result<StreamInfo> {
        let stream = self.stream_by_id(stream_id).await?;
        let remaining = self.remaining_pool(&stream).await?;
        Ok(stream.info(remaining))
    }

    async fn remaining_pool(&self, stream: &Stream) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(UNADMITTED_COUNT_SQL)
            .bind(stream.user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }

    async fn remaining_pool_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream: &Stream,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(UNADMITTED_COUNT_SQL)
            .bind(stream.user_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }

    /// Record the time of the latest reconciliation run.
    pub async fn touch_fetch_time(&self, stream_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE streams SET last_fetch_at = $1 WHERE id = $2")
            .bind(at)
            .bind(stream_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// Opportunistic notification bookkeeping; never blocks stream reads.
    pub async fn update_notifications(
        &self,
        stream_id: Uuid,
        state: NotificationState,
        count: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE streams SET notification_state = $1, notification_count = $2 WHERE id = $3",
        )
        .bind(state.as_i16())
        .bind(count)
        .bind(stream_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    // =========================================================================
    // ADMISSION
    // =========================================================================

    /// Admit the single oldest unadmitted status into the stream.
    ///
    /// At-most-once: selection, position assignment, and the stream_items
    /// insert happen in one transaction under the stream lock. Fails with
    /// `Empty` when the pool is drained.
    pub async fn pick_next(&self, stream_id: Uuid) -> Result<StreamStatus> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut stream = self.lock_stream_tx(&mut tx, stream_id).await?;
        let item = self.pick_next_tx(&mut tx, &mut stream).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(item)
    }

    /// Admit one status within a transaction already holding the stream
    /// lock. Updates `stream`'s counters in place.
    pub async fn pick_next_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream: &mut Stream,
    ) -> Result<StreamStatus> {
        // Oldest unadmitted status across the owning user's accounts.
        // The UNIQUE(status_uid) constraint on stream_items backstops the
        // at-most-once guarantee.
        let row = sqlx::query(
            "SELECT s.id, s.status_id, s.status, s.reblog_of
             FROM statuses s
             JOIN accounts a ON a.id = s.account_id
             WHERE a.user_id = $1
               AND NOT EXISTS (SELECT 1 FROM stream_items si WHERE si.status_uid = s.id)
             ORDER BY length(s.status_id), s.status_id
             LIMIT 1",
        )
        .bind(stream.user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::Empty)?;

        let status_uid: Uuid = row.get("id");
        let status_id = StatusId::from(row.get::<String, _>("status_id"));
        let status: JsonValue = row.get("status");
        let reblog_of = row
            .get::<Option<String>, _>("reblog_of")
            .map(StatusId::from);

        let position = if stream.last_position == 0 {
            stream.first_position = 1;
            1
        } else {
            stream.last_position + 1
        };
        stream.last_position = position;
        stream.lifetime_admitted += 1;

        // A reblog is "already seen" when an earlier item of this stream
        // showed the same source status.
        let source = reblog_of.as_ref().unwrap_or(&status_id);
        let already_seen: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM stream_items si
                 JOIN statuses st ON st.id = si.status_uid
                 WHERE si.stream_id = $1
                   AND (st.status_id = $2 OR st.reblog_of = $2)
             )",
        )
        .bind(stream.id)
        .bind(source.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        let filter_state = status
            .get("filtered")
            .cloned()
            .unwrap_or(JsonValue::Array(Vec::new()));

        sqlx::query(
            "INSERT INTO stream_items
                 (stream_id, position, status_uid, already_seen, filter_state, admitted_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(stream.id)
        .bind(position)
        .bind(status_uid)
        .bind(already_seen)
        .bind(&filter_state)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "UPDATE streams
             SET first_position = $1, last_position = $2, lifetime_admitted = $3
             WHERE id = $4",
        )
        .bind(stream.first_position)
        .bind(stream.last_position)
        .bind(stream.lifetime_admitted)
        .bind(stream.id)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(StreamStatus {
            position,
            status_id,
            status,
            already_seen,
            filter_state,
        })
    }

    /// Admit until `last_position >= target` or the pool is drained.
    /// Returns the number of admissions performed.
    async fn admit_up_to_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream: &mut Stream,
        target: i64,
    ) -> Result<i64> {
        let mut admitted = 0;
        while stream.last_position < target {
            match self.pick_next_tx(tx, stream).await {
                Ok(_) => admitted += 1,
                Err(Error::Empty) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(admitted)
    }

    // =========================================================================
    // READ MARKER
    // =========================================================================

    /// Update the persisted read marker.
    ///
    /// ABSOLUTE sets it unconditionally; ADVANCE takes the max and treats a
    /// regression as a silent no-op, since "mark up to here" requests race
    /// with newer reads. The position must fall inside
    /// `[first_position - 1, last_position]` (`first_position - 1` marks
    /// "nothing read" on a non-empty stream).
    pub async fn set_read(&self, stream_id: Uuid, position: i64, mode: ReadMode) -> Result<Stream> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut stream = self.lock_stream_tx(&mut tx, stream_id).await?;

        if position < 0 || position < stream.first_position - 1 || position > stream.last_position
        {
            return Err(Error::InvalidInput(format!(
                "last-read {position} outside [{}, {}]",
                (stream.first_position - 1).max(0),
                stream.last_position
            )));
        }

        let new_read = match mode {
            ReadMode::Absolute => position,
            ReadMode::Advance => stream.last_read.max(position),
        };

        if new_read != stream.last_read {
            sqlx::query("UPDATE streams SET last_read = $1 WHERE id = $2")
                .bind(new_read)
                .bind(stream_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
            stream.last_read = new_read;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(stream)
    }

    // =========================================================================
    // CLEAR
    // =========================================================================

    /// Detach all items (their statuses return to the unadmitted pool) and
    /// reset the counters to the empty-stream sentinel. The stream identity
    /// and owner are preserved.
    pub async fn clear(&self, stream_id: Uuid) -> Result<Stream> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut stream = self.lock_stream_tx(&mut tx, stream_id).await?;

        sqlx::query("DELETE FROM stream_items WHERE stream_id = $1")
            .bind(stream_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        sqlx::query(
            "UPDATE streams SET first_position = 0, last_position = 0, last_read = 0 WHERE id = $1",
        )
        .bind(stream_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        stream.first_position = 0;
        stream.last_position = 0;
        stream.last_read = 0;
        Ok(stream)
    }

    // =========================================================================
    // LISTING
    // =========================================================================

    /// Cursor-based listing over the stream, admitting from the pool on
    /// demand for INITIAL and FORWARD. Callers never see a position that
    /// has not been durably assigned: admission and the read run in the
    /// same transaction.
    pub async fn list(
        &self,
        stream_id: Uuid,
        direction: ListDirection,
        position: i64,
        page_size: i64,
    ) -> Result<ListResponse> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut stream = self.lock_stream_tx(&mut tx, stream_id).await?;

        let (items, anchor) = match direction {
            ListDirection::Forward => {
                let anchor = if position == 0 {
                    stream.last_read
                } else {
                    validate_anchor(&stream, position)?;
                    position
                };
                self.admit_up_to_tx(&mut tx, &mut stream, anchor + page_size)
                    .await?;
                let items = self
                    .items_after_tx(&mut tx, stream_id, anchor, page_size)
                    .await?;
                (items, anchor)
            }
            ListDirection::Initial => {
                if stream.last_position == 0 && stream.lifetime_admitted == 0 {
                    // Virgin stream: materialize a first page from the pool.
                    // A cleared stream stays empty until an explicit FORWARD
                    // resumes admission.
                    self.admit_up_to_tx(&mut tx, &mut stream, page_size).await?;
                }
                // Window ending at the read marker; with nothing read yet,
                // the most recent admitted items.
                let end = if stream.last_read < stream.first_position {
                    stream.last_position
                } else {
                    stream.last_read
                };
                let items = self
                    .items_through_tx(&mut tx, stream_id, end, page_size)
                    .await?;
                (items, end)
            }
            ListDirection::Backward => {
                if position == 0 {
                    return Err(Error::InvalidInput(
                        "backward listing requires a previously returned position".to_string(),
                    ));
                }
                validate_anchor(&stream, position)?;
                let items = self
                    .items_before_tx(&mut tx, stream_id, position, page_size)
                    .await?;
                (items, position)
            }
        };

        let remaining = self.remaining_pool_tx(&mut tx, &stream).await?;
        tx.commit().await.map_err(Error::Database)?;

        let backward_position = items.first().map(|i| i.position).unwrap_or(anchor);
        let forward_position = items.last().map(|i| i.position).unwrap_or(anchor);

        Ok(ListResponse {
            items,
            backward_position,
            forward_position,
            stream_info: stream.info(remaining),
        })
    }

    /// Items strictly after `position`, ascending.
    async fn items_after_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream_id: Uuid,
        position: i64,
        limit: i64,
    ) -> Result<Vec<StreamStatus>> {
        let rows = sqlx::query(
            "SELECT si.position, st.status_id, st.status, si.already_seen, si.filter_state
             FROM stream_items si
             JOIN statuses st ON st.id = si.status_uid
             WHERE si.stream_id = $1 AND si.position > $2
             ORDER BY si.position
             LIMIT $3",
        )
        .bind(stream_id)
        .bind(position)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(parse_item_row).collect())
    }

    /// Items strictly before `position`, the closest `limit` of them,
    /// returned ascending. History only: never admits.
    async fn items_before_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream_id: Uuid,
        position: i64,
        limit: i64,
    ) -> Result<Vec<StreamStatus>> {
        let rows = sqlx::query(
            "SELECT si.position, st.status_id, st.status, si.already_seen, si.filter_state
             FROM stream_items si
             JOIN statuses st ON st.id = si.status_uid
             WHERE si.stream_id = $1 AND si.position < $2
             ORDER BY si.position DESC
             LIMIT $3",
        )
        .bind(stream_id)
        .bind(position)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;

        let mut items: Vec<StreamStatus> = rows.into_iter().map(parse_item_row).collect();
        items.reverse();
        Ok(items)
    }

    /// Window of `limit` items ending at `position` inclusive, ascending.
    async fn items_through_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream_id: Uuid,
        position: i64,
        limit: i64,
    ) -> Result<Vec<StreamStatus>> {
        let rows = sqlx::query(
            "SELECT si.position, st.status_id, st.status, si.already_seen, si.filter_state
             FROM stream_items si
             JOIN statuses st ON st.id = si.status_uid
             WHERE si.stream_id = $1 AND si.position <= $2
             ORDER BY si.position DESC
             LIMIT $3",
        )
        .bind(stream_id)
        .bind(position)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;

        let mut items: Vec<StreamStatus> = rows.into_iter().map(parse_item_row).collect();
        items.reverse();
        Ok(items)
    }
}

/// Anchors must be positions the stream has actually handed out.
fn validate_anchor(stream: &Stream, position: i64) -> Result<()> {
    if position < stream.first_position || position > stream.last_position {
        return Err(Error::InvalidInput(format!(
            "position {position} was never returned by stream {} (admitted range [{}, {}])",
            stream.id, stream.first_position, stream.last_position
        )));
    }
    Ok(())
}

const UNADMITTED_COUNT_SQL: &str = "SELECT COUNT(*)
     FROM statuses s
     JOIN accounts a ON a.id = s.account_id
     WHERE a.user_id = $1
       AND NOT EXISTS (SELECT 1 FROM stream_items si WHERE si.status_uid = s.id)";

fn select_stream_sql(for_update: bool) -> String {
    let mut sql = String::from(
        "SELECT id, user_id, first_position, last_position, last_read, lifetime_admitted,
                last_fetch_at, notification_state, notification_count
         FROM streams WHERE id = $1",
    );
    if for_update {
        sql.push_str(" FOR UPDATE");
    }
    sql
}

fn parse_stream_row(row: sqlx::postgres::PgRow) -> Stream {
    Stream {
        id: row.get("id"),
        user_id: row.get("user_id"),
        first_position: row.get("first_position"),
        last_position: row.get("last_position"),
        last_read: row.get("last_read"),
        lifetime_admitted: row.get("lifetime_admitted"),
        last_fetch_at: row.get("last_fetch_at"),
        notification_state: NotificationState::from_i16(row.get("notification_state")),
        notification_count: row.get("notification_count"),
    }
}

fn parse_item_row(row: sqlx::postgres::PgRow) -> StreamStatus {
    StreamStatus {
        position: row.get("position"),
        status_id: StatusId::from(row.get::<String, _>("status_id")),
        status: row.get("status"),
        already_seen: row.get("already_seen"),
        filter_state: row.get("filter_state"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidepool_core::NotificationState;

    fn stream(first: i64, last: i64) -> Stream {
        Stream {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            first_position: first,
            last_position: last,
            last_read: 0,
            lifetime_admitted: last,
            last_fetch_at: None,
            notification_state: NotificationState::Unknown,
            notification_count: 0,
        }
    }

    #[test]
    fn test_validate_anchor_in_range() {
        let s = stream(1, 5);
        assert!(validate_anchor(&s, 1).is_ok());
        assert!(validate_anchor(&s, 5).is_ok());
    }

    #[test]
    fn test_validate_anchor_out_of_range() {
        let s = stream(1, 5);
        assert!(validate_anchor(&s, 6).is_err());
        assert!(validate_anchor(&s, 0).is_err());
    }

    #[test]
    fn test_validate_anchor_empty_stream() {
        let s = stream(0, 0);
        assert!(validate_anchor(&s, 1).is_err());
    }

    #[test]
    fn test_select_stream_sql_for_update() {
        assert!(select_stream_sql(true).ends_with("FOR UPDATE"));
        assert!(!select_stream_sql(false).contains("FOR UPDATE"));
    }
}
