//! JetStreamSink - NATS JetStream への配送
//!
//! - stream 名はサービス名、subjects は `{service}.>`
//! - publish は JetStream の PubAck を待ってから Ok を返す（ack 前に published にしない）

use async_nats::jetstream::{self, stream};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::{OutboxRecord, SinkError, WireMessage, derive_subject, stream_wildcard};
use crate::ports::DeliverySink;

/// Delivery sink backed by a JetStream context.
#[derive(Clone)]
pub struct JetStreamSink {
    context: jetstream::Context,
    service_name: String,
}

impl JetStreamSink {
    pub fn new(context: jetstream::Context, service_name: impl Into<String>) -> Self {
        Self {
            context,
            service_name: service_name.into(),
        }
    }

    /// Connect to the NATS server at `url` and open a JetStream context.
    pub async fn connect(url: &str, service_name: impl Into<String>) -> Result<Self, SinkError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| SinkError::Connect {
                url: url.to_string(),
                source: Box::new(e),
            })?;
        Ok(Self::new(jetstream::new(client), service_name))
    }
}

#[async_trait]
impl DeliverySink for JetStreamSink {
    async fn publish(&self, record: &OutboxRecord) -> Result<(), SinkError> {
        let subject =
            derive_subject(&self.service_name, &record.aggregate_type, &record.event_type)?;
        let payload = WireMessage::from(record).to_bytes()?;

        let ack = self
            .context
            .publish(subject.as_str().to_owned(), payload.into())
            .await
            .map_err(|e| SinkError::Publish {
                subject: subject.to_string(),
                source: Box::new(e),
            })?;

        let ack = ack.await.map_err(|e| SinkError::Ack {
            subject: subject.to_string(),
            source: Box::new(e),
        })?;

        debug!(
            record_id = %record.id,
            %subject,
            stream = %ack.stream,
            sequence = ack.sequence,
            "record acknowledged"
        );
        Ok(())
    }

    async fn ensure_topic(&self) -> Result<(), SinkError> {
        let config = stream::Config {
            name: self.service_name.clone(),
            subjects: vec![stream_wildcard(&self.service_name)],
            ..Default::default()
        };

        // 既存の stream はそのまま使う（作成済みでも成功扱い）
        let stream = self
            .context
            .get_or_create_stream(config)
            .await
            .map_err(|e| SinkError::Provision {
                stream: self.service_name.clone(),
                source: Box::new(e),
            })?;

        info!(stream = %stream.cached_info().config.name, "stream ready");
        Ok(())
    }
}
