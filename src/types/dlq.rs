//! Dead-letter message format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::Document;
use super::entities::ItemType;

fn unknown_source() -> String {
    "unknown".to_string()
}

/// An item that exhausted its retries, as stored on the durable queue and in
/// fallback files.
///
/// Serialized as `{type, data, timestamp, retry_count, source}`. Older
/// producers wrote the payload under `payload`, which is accepted on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqMessage {
    /// Kind of item.
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// The original item.
    #[serde(rename = "data", alias = "payload")]
    pub payload: Document,
    /// When the item was dead-lettered.
    #[serde(rename = "timestamp")]
    pub enqueued_at: DateTime<Utc>,
    /// Number of replay attempts so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Component that produced the message.
    #[serde(default = "unknown_source")]
    pub source: String,
}

impl DlqMessage {
    /// Creates a fresh message with a zero retry count.
    pub fn new(item_type: ItemType, payload: Document, source: impl Into<String>) -> Self {
        Self {
            item_type,
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            source: source.into(),
        }
    }

    /// The payload's id, or `"unknown"`.
    pub fn item_id(&self) -> String {
        self.payload
            .id_string()
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_layout() {
        let message = DlqMessage::new(ItemType::Post, Document::new().with("id", 4), "processing");
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["type"], "post");
        assert_eq!(value["data"]["id"], 4);
        assert_eq!(value["retry_count"], 0);
        assert_eq!(value["source"], "processing");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_accepts_payload_alias_and_defaults() {
        let message: DlqMessage = serde_json::from_value(json!({
            "type": "comment",
            "payload": {"id": "abc"},
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(message.item_type, ItemType::Comment);
        assert_eq!(message.item_id(), "abc");
        assert_eq!(message.retry_count, 0);
        assert_eq!(message.source, "unknown");
    }
}
