//! WireMessage - ブローカーに流す本文
//!
//! JSON オブジェクト `{id, aggregate_type, event_type, content}`。
//! content はそのまま埋め込む（relay は中身を解釈しない）。

use serde::{Deserialize, Serialize};

use super::errors::SinkError;
use super::record::{OutboxRecord, RecordId};

/// Borrowed view of a record in its wire shape.
#[derive(Debug, Serialize)]
pub struct WireMessage<'a> {
    pub id: &'a RecordId,
    pub aggregate_type: &'a str,
    pub event_type: &'a str,
    pub content: &'a serde_json::Value,
}

impl<'a> From<&'a OutboxRecord> for WireMessage<'a> {
    fn from(record: &'a OutboxRecord) -> Self {
        Self {
            id: &record.id,
            aggregate_type: &record.aggregate_type,
            event_type: &record.event_type,
            content: &record.content,
        }
    }
}

impl WireMessage<'_> {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SinkError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Owned form, as a consumer would decode it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecodedMessage {
    pub id: RecordId,
    pub aggregate_type: String,
    pub event_type: String,
    pub content: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn wire_form_carries_identity_and_payload_only() {
        let record = OutboxRecord::pending(
            "01J9ZQ",
            "invoice",
            "created",
            serde_json::json!({"total": 42, "lines": [1, 2]}),
            Utc::now(),
        );

        let bytes = WireMessage::from(&record).to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "id": "01J9ZQ",
                "aggregate_type": "invoice",
                "event_type": "created",
                "content": {"total": 42, "lines": [1, 2]},
            })
        );
        // status / timestamps はブローカーに出さない
        assert!(value.get("status").is_none());

        let decoded: DecodedMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.id, record.id);
        assert_eq!(decoded.content, record.content);
    }
}
