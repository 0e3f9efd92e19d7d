//! InMemorySink - テスト用のブローカー
//!
//! publish されたメッセージを subject ごとに記録する。
//! レコード単位で失敗・panic を仕込める。

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{
    DecodedMessage, OutboxRecord, RecordId, SinkError, Subject, WireMessage, derive_subject,
};
use crate::ports::DeliverySink;

#[derive(Debug, Default)]
struct SinkState {
    published: Vec<(Subject, DecodedMessage)>,
    fail_ids: HashSet<RecordId>,
    panic_ids: HashSet<RecordId>,
    ensure_calls: usize,
}

/// Broker stand-in that keeps every acknowledged message.
#[derive(Debug)]
pub struct InMemorySink {
    service_name: String,
    latency: Option<Duration>,
    state: Mutex<SinkState>,
}

impl InMemorySink {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            latency: None,
            state: Mutex::new(SinkState::default()),
        }
    }

    /// Delay every publish, so that deliveries overlap in time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The broker rejects this record until [`InMemorySink::heal`].
    pub fn fail_on(&self, id: impl Into<RecordId>) {
        self.state().fail_ids.insert(id.into());
    }

    /// Publishing this record panics the delivery task.
    pub fn panic_on(&self, id: impl Into<RecordId>) {
        self.state().panic_ids.insert(id.into());
    }

    pub fn heal(&self) {
        let mut state = self.state();
        state.fail_ids.clear();
        state.panic_ids.clear();
    }

    pub fn published(&self) -> Vec<(Subject, DecodedMessage)> {
        self.state().published.clone()
    }

    /// How many times `id` was acknowledged.
    pub fn delivery_count(&self, id: &RecordId) -> usize {
        self.state()
            .published
            .iter()
            .filter(|(_, msg)| &msg.id == id)
            .count()
    }

    pub fn ensure_calls(&self) -> usize {
        self.state().ensure_calls
    }
}

#[async_trait]
impl DeliverySink for InMemorySink {
    async fn publish(&self, record: &OutboxRecord) -> Result<(), SinkError> {
        let subject =
            derive_subject(&self.service_name, &record.aggregate_type, &record.event_type)?;
        let bytes = WireMessage::from(record).to_bytes()?;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let (fail, panic) = {
            let state = self.state();
            (
                state.fail_ids.contains(&record.id),
                state.panic_ids.contains(&record.id),
            )
        };
        if panic {
            panic!("delivery of {} panicked", record.id);
        }
        if fail {
            return Err(SinkError::Publish {
                subject: subject.into_inner(),
                source: "broker rejected message".into(),
            });
        }

        // 実ブローカーの consumer と同じく bytes から decode して保存
        let message: DecodedMessage = serde_json::from_slice(&bytes)?;
        self.state().published.push((subject, message));
        Ok(())
    }

    async fn ensure_topic(&self) -> Result<(), SinkError> {
        self.state().ensure_calls += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, aggregate: &str, event: &str) -> OutboxRecord {
        OutboxRecord::pending(id, aggregate, event, serde_json::json!({"n": 1}), Utc::now())
    }

    #[tokio::test]
    async fn publishes_on_derived_subject() {
        let sink = InMemorySink::new("orders");
        sink.publish(&record("a", "invoice", "created")).await.unwrap();

        let published = sink.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0.as_str(), "orders.invoice.created");
        assert_eq!(published[0].1.event_type, "created");
        assert_eq!(published[0].1.content, serde_json::json!({"n": 1}));
    }

    #[tokio::test]
    async fn invalid_subject_token_is_a_delivery_failure() {
        let sink = InMemorySink::new("orders");
        let err = sink
            .publish(&record("a", "invoice.v2", "created"))
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::Subject { .. }));
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_until_healed() {
        let sink = InMemorySink::new("orders");
        sink.fail_on("a");

        assert!(sink.publish(&record("a", "invoice", "created")).await.is_err());
        sink.heal();
        sink.publish(&record("a", "invoice", "created")).await.unwrap();
        assert_eq!(sink.delivery_count(&"a".into()), 1);
    }

    #[tokio::test]
    async fn ensure_topic_is_idempotent() {
        let sink = InMemorySink::new("orders");
        sink.ensure_topic().await.unwrap();
        sink.ensure_topic().await.unwrap();
        assert_eq!(sink.ensure_calls(), 2);
    }
}
