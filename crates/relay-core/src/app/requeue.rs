//! Operator requeue: `failed -> pending`.
//!
//! relay ループからは呼ばない。CLI の `requeue` サブコマンド専用。

use std::sync::Arc;

use tracing::info;

use crate::domain::{RecordId, RelayError};
use crate::ports::{RecordStore, with_transaction};

/// Reset failed records to pending in one transaction.
///
/// An empty `ids` means every failed record. Returns the number reset.
pub async fn requeue_failed<S>(store: Arc<S>, ids: Vec<RecordId>) -> Result<u64, RelayError>
where
    S: RecordStore + ?Sized + 'static,
{
    let tx_store = Arc::clone(&store);
    let selected = ids.len();

    let count = with_transaction(&*store, move |tx| {
        Box::pin(async move {
            let filter = (!ids.is_empty()).then_some(ids.as_slice());
            Ok(tx_store.requeue_failed(tx, filter).await?)
        })
    })
    .await?;

    info!(requeued = count, selected, "failed records requeued");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::{ClaimPolicy, OutboxRecord, RecordStatus};
    use crate::impls::InMemoryRecordStore;

    fn failed(id: &str) -> OutboxRecord {
        let mut r = OutboxRecord::pending(id, "invoice", "created", serde_json::json!({}), Utc::now());
        r.mark_failed();
        r
    }

    #[tokio::test]
    async fn requeues_selected_ids() {
        let store = Arc::new(InMemoryRecordStore::with_policy(ClaimPolicy::PendingOnly));
        store.insert(failed("a"));
        store.insert(failed("b"));

        let n = requeue_failed(Arc::clone(&store), vec!["b".into()]).await.unwrap();

        assert_eq!(n, 1);
        assert_eq!(store.get(&"a".into()).unwrap().status, RecordStatus::Failed);
        assert_eq!(store.get(&"b".into()).unwrap().status, RecordStatus::Pending);
    }

    #[tokio::test]
    async fn empty_selection_requeues_everything_failed() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.insert(failed("a"));
        store.insert(failed("b"));

        let n = requeue_failed(Arc::clone(&store), Vec::new()).await.unwrap();

        assert_eq!(n, 2);
        assert_eq!(store.counts_by_status().await.unwrap().pending, 2);
    }
}
