//! Status pool repository.
//!
//! Fetched statuses land here before admission into a stream. A status is
//! "unadmitted" while no stream_items row references it; there is no
//! admitted flag on the status row itself.

use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use tidepool_core::{new_v7, Error, PoolStatus, Result, SearchResult, StatusId};

/// PostgreSQL implementation of the status pool.
#[derive(Clone)]
pub struct PgStatusRepository {
    pool: Pool<Postgres>,
}

impl PgStatusRepository {
    /// Create a new PgStatusRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a fetched status. Idempotent: re-inserting an already stored
    /// `(account, status_id)` pair is a no-op. Returns true when a row was
    /// actually written.
    pub async fn insert(
        &self,
        account_id: Uuid,
        status_id: &StatusId,
        status: &JsonValue,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let inserted = self.insert_tx(&mut tx, account_id, status_id, status).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(inserted)
    }

    /// Insert a fetched status within a transaction.
    pub async fn insert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
        status_id: &StatusId,
        status: &JsonValue,
    ) -> Result<bool> {
        let reblog_of = reblog_source(status);

        let result = sqlx::query(
            "INSERT INTO statuses (id, account_id, status_id, status, reblog_of, fetched_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (account_id, status_id) DO NOTHING",
        )
        .bind(new_v7())
        .bind(account_id)
        .bind(status_id.as_str())
        .bind(status)
        .bind(reblog_of.as_deref())
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Number of statuses across the user's accounts not yet admitted into
    /// any stream.
    pub async fn unadmitted_count(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)
             FROM statuses s
             JOIN accounts a ON a.id = s.account_id
             WHERE a.user_id = $1
               AND NOT EXISTS (SELECT 1 FROM stream_items si WHERE si.status_uid = s.id)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(count)
    }

    /// Up to `limit` unadmitted statuses for the user's accounts, oldest
    /// remote id first. Selection only; nothing is consumed.
    pub async fn oldest_unadmitted(&self, user_id: Uuid, limit: i64) -> Result<Vec<PoolStatus>> {
        let rows = sqlx::query(
            "SELECT s.id, s.account_id, s.status_id, s.status, s.reblog_of, s.fetched_at
             FROM statuses s
             JOIN accounts a ON a.id = s.account_id
             WHERE a.user_id = $1
               AND NOT EXISTS (SELECT 1 FROM stream_items si WHERE si.status_uid = s.id)
             ORDER BY length(s.status_id), s.status_id
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(parse_pool_status_row).collect())
    }

    /// Point lookup by remote status id across the user's accounts,
    /// carrying the stream position when admitted.
    pub async fn lookup(&self, user_id: Uuid, status_id: &StatusId) -> Result<Vec<SearchResult>> {
        let rows = sqlx::query(
            "SELECT s.status_id, s.status, si.position
             FROM statuses s
             JOIN accounts a ON a.id = s.account_id
             LEFT JOIN stream_items si ON si.status_uid = s.id
             WHERE a.user_id = $1 AND s.status_id = $2
             ORDER BY s.fetched_at",
        )
        .bind(user_id)
        .bind(status_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| SearchResult {
                status_id: StatusId::from(r.get::<String, _>("status_id")),
                status: r.get("status"),
                position: r.get("position"),
            })
            .collect())
    }
}

/// Remote id of the reblogged source, when the payload is a reblog.
pub(crate) fn reblog_source(status: &JsonValue) -> Option<String> {
    status
        .get("reblog")
        .and_then(|r| r.get("id"))
        .and_then(|id| id.as_str())
        .map(str::to_string)
}

fn parse_pool_status_row(row: sqlx::postgres::PgRow) -> PoolStatus {
    PoolStatus {
        uid: row.get("id"),
        account_id: row.get("account_id"),
        status_id: StatusId::from(row.get::<String, _>("status_id")),
        status: row.get("status"),
        reblog_of: row
            .get::<Option<String>, _>("reblog_of")
            .map(StatusId::from),
        fetched_at: row.get("fetched_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reblog_source_present() {
        let status = json!({"id": "5", "reblog": {"id": "3", "content": "hi"}});
        assert_eq!(reblog_source(&status), Some("3".to_string()));
    }

    #[test]
    fn test_reblog_source_absent() {
        assert_eq!(reblog_source(&json!({"id": "5"})), None);
        assert_eq!(reblog_source(&json!({"id": "5", "reblog": null})), None);
    }
}
