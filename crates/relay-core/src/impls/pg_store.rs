//! PostgresRecordStore - PostgreSQL の outbox テーブル
//!
//! # 実装詳細
//! - claim は `SELECT ... FOR UPDATE SKIP LOCKED`。他ワーカーがロック中の行は待たずに読み飛ばす
//! - `published_at` は DB の `now()` で打つ（アプリ側の時計に依存しない）
//! - テーブル名は bind できないので、識別子として検証してから SQL に埋め込む
//!
//! 想定スキーマ（tests/postgres.rs の DDL を参照）:
//! `id text primary key, aggregate_type text, event_type text, content jsonb,
//!  status text, published_at timestamptz null, created_at timestamptz`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{instrument, warn};

use crate::domain::{ClaimPolicy, OutboxRecord, RecordId, RecordStatus, RelayError, StoreError};
use crate::observability::StatusCounts;
use crate::ports::RecordStore;

const MAX_IDENTIFIER_LEN: usize = 63;

/// Checks a table name: `name` or `schema.name`, each part a plain SQL identifier.
pub fn validate_table_name(table: &str) -> Result<(), String> {
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 {
        return Err(format!("table name '{table}' has too many qualifiers"));
    }
    for part in parts {
        let mut chars = part.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !head_ok || !tail_ok || part.len() > MAX_IDENTIFIER_LEN {
            return Err(format!("'{part}' is not a valid SQL identifier"));
        }
    }
    Ok(())
}

/// SQL text for one outbox table.
#[derive(Debug, Clone)]
struct Queries {
    claim: String,
    mark_published: String,
    mark_failed: String,
    requeue_all: String,
    requeue_ids: String,
    counts: String,
}

impl Queries {
    fn new(table: &str, policy: ClaimPolicy) -> Self {
        // 未知の status 値は claim しない（decode できない行でループ全体を止めない）。
        // failed の再試行より新しい pending を先に取る。
        let (claimable, order) = match policy {
            ClaimPolicy::Unpublished => (
                "status IN ('pending', 'failed')",
                "(status = 'failed'), created_at",
            ),
            ClaimPolicy::PendingOnly => ("status = 'pending'", "created_at"),
        };
        Self {
            claim: format!(
                "SELECT id, aggregate_type, event_type, content, status, published_at, created_at \
                 FROM {table} WHERE {claimable} ORDER BY {order} LIMIT $1 FOR UPDATE SKIP LOCKED"
            ),
            mark_published: format!(
                "UPDATE {table} SET status = $1, published_at = now() WHERE id = ANY($2)"
            ),
            mark_failed: format!("UPDATE {table} SET status = $1 WHERE id = ANY($2)"),
            requeue_all: format!(
                "UPDATE {table} SET status = 'pending', published_at = NULL WHERE status = 'failed'"
            ),
            requeue_ids: format!(
                "UPDATE {table} SET status = 'pending', published_at = NULL \
                 WHERE status = 'failed' AND id = ANY($1)"
            ),
            counts: format!("SELECT status, COUNT(*) FROM {table} GROUP BY status"),
        }
    }
}

#[derive(Debug, FromRow)]
struct RecordRow {
    id: String,
    aggregate_type: String,
    event_type: String,
    content: serde_json::Value,
    status: String,
    published_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for OutboxRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(OutboxRecord {
            id: RecordId::from(row.id),
            aggregate_type: row.aggregate_type,
            event_type: row.event_type,
            content: row.content,
            status: row.status.parse()?,
            published_at: row.published_at,
            created_at: row.created_at,
        })
    }
}

fn id_strings(ids: &[RecordId]) -> Vec<String> {
    ids.iter().map(|id| id.as_str().to_owned()).collect()
}

/// Postgres-backed outbox table.
///
/// Cheap to clone; all clones share one `PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
    queries: Queries,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool, table: &str, policy: ClaimPolicy) -> Result<Self, RelayError> {
        validate_table_name(table).map_err(RelayError::Config)?;
        Ok(Self {
            pool,
            queries: Queries::new(table, policy),
        })
    }

    /// Connect a pool sized for `max_connections` concurrent transactions.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        table: &str,
        policy: ClaimPolicy,
    ) -> Result<Self, RelayError> {
        validate_table_name(table).map_err(RelayError::Config)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connect(Box::new(e)))?;
        Self::new(pool, table, policy)
    }

    async fn set_status(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        sql: &str,
        status: RecordStatus,
        ids: &[RecordId],
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(sql)
            .bind(status.as_str())
            .bind(id_strings(ids))
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::WriteBack {
                status,
                source: Box::new(e),
            })?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::Begin(Box::new(e)))
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.commit().await.map_err(|e| StoreError::Commit(Box::new(e)))
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.rollback()
            .await
            .map_err(|e| StoreError::Rollback(Box::new(e)))
    }

    #[instrument(skip(self, tx), err)]
    async fn claim_batch(
        &self,
        tx: &mut Self::Tx,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<RecordRow> = sqlx::query_as(&self.queries.claim)
            .bind(limit)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| StoreError::Claim(Box::new(e)))?;

        rows.into_iter().map(OutboxRecord::try_from).collect()
    }

    async fn mark_published(&self, tx: &mut Self::Tx, ids: &[RecordId]) -> Result<(), StoreError> {
        self.set_status(tx, &self.queries.mark_published, RecordStatus::Published, ids)
            .await
    }

    async fn mark_failed(&self, tx: &mut Self::Tx, ids: &[RecordId]) -> Result<(), StoreError> {
        self.set_status(tx, &self.queries.mark_failed, RecordStatus::Failed, ids)
            .await
    }

    #[instrument(skip(self, tx, ids), err)]
    async fn requeue_failed(
        &self,
        tx: &mut Self::Tx,
        ids: Option<&[RecordId]>,
    ) -> Result<u64, StoreError> {
        let query = match ids {
            None => sqlx::query(&self.queries.requeue_all),
            Some([]) => return Ok(0),
            Some(ids) => sqlx::query(&self.queries.requeue_ids).bind(id_strings(ids)),
        };
        let result = query
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::WriteBack {
                status: RecordStatus::Pending,
                source: Box::new(e),
            })?;
        Ok(result.rows_affected())
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(&self.queries.counts)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(Box::new(e)))?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            match status.parse::<RecordStatus>() {
                Ok(status) => counts.add(status, u64::try_from(n).unwrap_or(0)),
                Err(err) => warn!(rows = n, error = %err, "skipping rows with unknown status"),
            }
        }
        Ok(counts)
    }
}
