//! DeliverySink port - メッセージブローカーへの配送
//!
//! # 実装
//! - `JetStreamSink`（NATS JetStream、本番用）
//! - `InMemorySink`（テスト用）

use async_trait::async_trait;

use crate::domain::{OutboxRecord, SinkError};

/// Publishes records to the broker.
///
/// `publish` returns only after the broker has acknowledged the message; an
/// `Ok` is what allows the record to be marked published.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Publish one record on `{service}.{aggregate_type}.{event_type}`.
    async fn publish(&self, record: &OutboxRecord) -> Result<(), SinkError>;

    /// Make sure the service's topic exists. Already existing counts as success.
    async fn ensure_topic(&self) -> Result<(), SinkError>;
}
