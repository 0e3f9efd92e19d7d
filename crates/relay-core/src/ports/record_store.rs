//! RecordStore port - outbox テーブルへのトランザクショナルなアクセス
//!
//! # 設計原則
//! - claim → 配送 → write-back は 1 トランザクション内（行ロックをブローカー往復の間保持する）
//! - ワーカーがクラッシュするとトランザクションが abort され、ロックが外れて再 claim 可能になる
//! - 排他は DB の行ロック（`FOR UPDATE SKIP LOCKED`）が担う。アプリ側では調停しない
//!
//! # 実装
//! - `PostgresRecordStore`（本番用）
//! - `InMemoryRecordStore`（テスト用）

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::domain::{OutboxRecord, RecordId, RelayError, StoreError};
use crate::observability::StatusCounts;

/// Future returned by a transactional unit of work.
pub type TxFuture<'t, T> = Pin<Box<dyn Future<Output = Result<T, RelayError>> + Send + 't>>;

/// Transactional access to outbox records.
///
/// Every mutating operation takes the open transaction; nothing is visible to
/// other workers until `commit`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Open transaction handle.
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;

    /// Lock and return up to `limit` claimable records, oldest first.
    ///
    /// Rows locked by another transaction are skipped, never waited on.
    /// No claimable rows is `Ok(vec![])`.
    async fn claim_batch(
        &self,
        tx: &mut Self::Tx,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Set `published` and stamp `published_at`. Empty `ids` is a no-op.
    async fn mark_published(&self, tx: &mut Self::Tx, ids: &[RecordId]) -> Result<(), StoreError>;

    /// Set `failed`. Empty `ids` is a no-op.
    async fn mark_failed(&self, tx: &mut Self::Tx, ids: &[RecordId]) -> Result<(), StoreError>;

    /// Operator requeue: `failed -> pending` for the given ids, or for every
    /// failed record when `ids` is `None`. Returns the number of rows reset.
    async fn requeue_failed(
        &self,
        tx: &mut Self::Tx,
        ids: Option<&[RecordId]>,
    ) -> Result<u64, StoreError>;

    /// Committed status counts.
    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError>;
}

/// Runs `work` inside one transaction.
///
/// - `Ok` → commit (a commit failure is returned as-is)
/// - `Err` → best-effort rollback, then the original error. If the rollback
///   fails too, both are returned in `RelayError::RollbackFailed`.
///
/// ```ignore
/// let n = with_transaction(&*store, |tx| {
///     let store = Arc::clone(&store);
///     Box::pin(async move { Ok(store.claim_batch(tx, 10).await?.len()) })
/// })
/// .await?;
/// ```
pub async fn with_transaction<S, T, F>(store: &S, work: F) -> Result<T, RelayError>
where
    S: RecordStore + ?Sized,
    T: Send,
    F: for<'t> FnOnce(&'t mut S::Tx) -> TxFuture<'t, T> + Send,
{
    let mut tx = store.begin().await?;

    match work(&mut tx).await {
        Ok(value) => {
            store.commit(tx).await?;
            Ok(value)
        }
        Err(err) => match store.rollback(tx).await {
            Ok(()) => Err(err),
            Err(rollback) => Err(RelayError::RollbackFailed {
                source: Box::new(err),
                rollback,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::domain::{ErrorKind, RecordStatus};
    use crate::impls::{InMemoryRecordStore, StoreFault};

    fn store_with(ids: &[&str]) -> Arc<InMemoryRecordStore> {
        let store = Arc::new(InMemoryRecordStore::new());
        for id in ids {
            store.insert(OutboxRecord::pending(
                *id,
                "invoice",
                "created",
                serde_json::json!({}),
                Utc::now(),
            ));
        }
        store
    }

    #[tokio::test]
    async fn commits_on_success() {
        let store = store_with(&["a", "b"]);

        let claimed = with_transaction(&*store, |tx| {
            let store = Arc::clone(&store);
            Box::pin(async move {
                let batch = store.claim_batch(tx, 10).await?;
                let ids: Vec<_> = batch.iter().map(|r| r.id.clone()).collect();
                store.mark_published(tx, &ids).await?;
                Ok(ids.len())
            })
        })
        .await
        .unwrap();

        assert_eq!(claimed, 2);
        assert_eq!(store.get(&"a".into()).unwrap().status, RecordStatus::Published);
        assert_eq!(store.get(&"b".into()).unwrap().status, RecordStatus::Published);
    }

    #[tokio::test]
    async fn rolls_back_and_returns_original_error() {
        let store = store_with(&["a"]);

        let err = with_transaction(&*store, |tx| {
            let store = Arc::clone(&store);
            Box::pin(async move {
                let batch = store.claim_batch(tx, 10).await?;
                let ids: Vec<_> = batch.iter().map(|r| r.id.clone()).collect();
                store.mark_published(tx, &ids).await?;
                Err::<(), _>(RelayError::Config("boom".into()))
            })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, RelayError::Config(msg) if msg == "boom"));
        // staged write was discarded
        assert_eq!(store.get(&"a".into()).unwrap().status, RecordStatus::Pending);
        assert_eq!(store.locked_count(), 0);
    }

    #[tokio::test]
    async fn rollback_failure_surfaces_both_errors() {
        let store = store_with(&["a"]);
        store.inject(StoreFault::Rollback);

        let err = with_transaction(&*store, |tx| {
            let store = Arc::clone(&store);
            Box::pin(async move {
                store.claim_batch(tx, 10).await?;
                Err::<(), _>(RelayError::Config("work failed".into()))
            })
        })
        .await
        .unwrap_err();

        match err {
            RelayError::RollbackFailed { source, rollback } => {
                assert!(matches!(*source, RelayError::Config(_)));
                assert_eq!(rollback.kind(), ErrorKind::Transaction);
            }
            other => panic!("expected RollbackFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn begin_failure_never_runs_work() {
        let store = store_with(&["a"]);
        store.inject(StoreFault::Begin);

        let err = with_transaction::<_, (), _>(&*store, |_tx| {
            Box::pin(async move { Err(RelayError::Config("work ran".into())) })
        })
        .await
        .unwrap_err();

        // begin の失敗がそのまま返り、work の Config エラーは出てこない
        assert_eq!(err.kind(), ErrorKind::Transaction);
    }
}
