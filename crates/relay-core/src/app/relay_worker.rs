//! RelayWorker - 1 イテレーション分の relay
//!
//! # フロー（すべて 1 トランザクション内）
//! 1. RecordStore::claim_batch() で最大 batch_size 件をロック付きで取得
//! 2. 全レコードを並行に DeliverySink::publish()（レコードごとに独立）
//! 3. join 後に結果を published / failed に振り分け
//! 4. mark_published / mark_failed で書き戻し
//! 5. commit（書き戻しが失敗したら rollback。レコードは次の poll で再 claim される）
//!
//! 配送結果は各タスクの戻り値として集め、join の後でまとめる。共有コンテナ + ロックは使わない。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::domain::{
    BatchOutcome, DeliveryResult, IterationReport, OutboxRecord, RecordId, RelayError,
};
use crate::ports::{DeliverySink, RecordStore, with_transaction};

/// Runs claim → deliver → reconcile iterations against one store and sink.
pub struct RelayWorker<S: ?Sized, D: ?Sized> {
    store: Arc<S>,
    sink: Arc<D>,
    batch_size: usize,
}

impl<S, D> RelayWorker<S, D>
where
    S: RecordStore + ?Sized + 'static,
    D: DeliverySink + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, sink: Arc<D>, batch_size: usize) -> Self {
        Self {
            store,
            sink,
            batch_size,
        }
    }

    /// One iteration. Record-level delivery failures never make this fail;
    /// claim, write-back and transaction failures do.
    pub async fn run_once(&self) -> Result<IterationReport, RelayError> {
        let store = Arc::clone(&self.store);
        let sink = Arc::clone(&self.sink);
        let limit = self.batch_size;

        with_transaction(&*self.store, move |tx| {
            Box::pin(async move {
                let batch = store.claim_batch(tx, limit).await?;
                if batch.is_empty() {
                    return Ok(IterationReport::empty());
                }

                let claimed = batch.len();
                let outcome = deliver_all(&sink, batch).await;

                store.mark_published(tx, &outcome.published).await?;
                store.mark_failed(tx, &outcome.failed).await?;

                Ok(IterationReport { claimed, outcome })
            })
        })
        .await
    }
}

/// Publishes every record concurrently and partitions the ids by result.
///
/// Returns only after every delivery task has finished. A task that panics is
/// counted as failed.
async fn deliver_all<D>(sink: &Arc<D>, batch: Vec<OutboxRecord>) -> BatchOutcome
where
    D: DeliverySink + ?Sized + 'static,
{
    let mut tasks = JoinSet::new();
    let mut pending: HashMap<tokio::task::Id, RecordId> = HashMap::with_capacity(batch.len());

    for record in batch {
        let sink = Arc::clone(sink);
        let id = record.id.clone();
        let handle = tasks.spawn(async move {
            match sink.publish(&record).await {
                Ok(()) => DeliveryResult::Delivered,
                Err(err) => {
                    warn!(
                        record_id = %record.id,
                        aggregate_type = %record.aggregate_type,
                        event_type = %record.event_type,
                        error.kind = err.kind().as_str(),
                        error = %err,
                        "delivery failed"
                    );
                    DeliveryResult::Failed {
                        reason: err.to_string(),
                    }
                }
            }
        });
        pending.insert(handle.id(), id);
    }

    let mut outcome = BatchOutcome::with_capacity(pending.len());
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((task_id, result)) => {
                if let Some(id) = pending.remove(&task_id) {
                    outcome.record(id, &result);
                }
            }
            Err(join_err) => {
                if let Some(id) = pending.remove(&join_err.id()) {
                    error!(
                        record_id = %id,
                        panicked = join_err.is_panic(),
                        "delivery task aborted"
                    );
                    let result = DeliveryResult::Failed {
                        reason: join_err.to_string(),
                    };
                    outcome.record(id, &result);
                }
            }
        }
    }
    outcome
}
