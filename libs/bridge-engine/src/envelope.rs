use base64::Engine;
use serde::Serialize;

use bridge_api::error::BridgeError;
use bridge_api::record::{BrokerRecord, RecordMetadata};

/// Variant tag, serialized as the `message` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Status,
    Error,
    Received,
    Published,
}

/// One message sent to the client, as a single JSON text frame.
///
/// Absent fields are omitted from the JSON. Which fields are present depends
/// on the variant:
///
/// | kind        | fields                                                  |
/// |-------------|---------------------------------------------------------|
/// | `status`    | `detail`, `consumer_group_name`, `topic_name`           |
/// | `error`     | `error`                                                 |
/// | `received`  | `consumer_group_name`, `topic_name`, `value`, position   |
/// | `published` | `consumer_group_name`, `topic_name`, broker metadata    |
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub message: EnvelopeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// `"base64"` when the payload was not valid UTF-8.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_encoding: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer_epoch: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_epoch: Option<i32>,
}

impl Envelope {
    fn empty(message: EnvelopeKind) -> Self {
        Self {
            message,
            detail: None,
            consumer_group_name: None,
            topic_name: None,
            value: None,
            value_encoding: None,
            error: None,
            partition: None,
            offset: None,
            timestamp: None,
            producer_epoch: None,
            producer_id: None,
            leader_epoch: None,
        }
    }

    pub fn status(client_id: &str, topic: &str, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            consumer_group_name: Some(client_id.to_string()),
            topic_name: Some(topic.to_string()),
            ..Self::empty(EnvelopeKind::Status)
        }
    }

    pub fn error(err: &BridgeError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::empty(EnvelopeKind::Error)
        }
    }

    pub fn received(client_id: &str, record: &BrokerRecord) -> Self {
        let (value, value_encoding) = encode_payload(&record.payload);
        Self {
            consumer_group_name: Some(client_id.to_string()),
            topic_name: Some(record.topic.clone()),
            value: Some(value),
            value_encoding,
            partition: Some(record.partition),
            offset: Some(record.offset),
            timestamp: record.timestamp_ms,
            ..Self::empty(EnvelopeKind::Received)
        }
    }

    pub fn published(client_id: &str, meta: &RecordMetadata) -> Self {
        Self {
            consumer_group_name: Some(client_id.to_string()),
            topic_name: Some(meta.topic.clone()),
            partition: Some(meta.partition),
            offset: Some(meta.offset),
            timestamp: meta.timestamp_ms,
            producer_epoch: meta.producer_epoch,
            producer_id: meta.producer_id,
            leader_epoch: meta.leader_epoch,
            ..Self::empty(EnvelopeKind::Published)
        }
    }

    pub fn to_json(&self) -> Result<String, BridgeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload as text when it is UTF-8, base64 otherwise.
fn encode_payload(payload: &[u8]) -> (String, Option<&'static str>) {
    match std::str::from_utf8(payload) {
        Ok(text) => (text.to_string(), None),
        Err(_) => (
            base64::engine::general_purpose::STANDARD.encode(payload),
            Some("base64"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn as_value(envelope: &Envelope) -> Value {
        serde_json::from_str(&envelope.to_json().unwrap()).unwrap()
    }

    #[test]
    fn status_shape() {
        let env = Envelope::status("alice", "orders", "session started");
        assert_eq!(
            as_value(&env),
            json!({
                "message": "status",
                "detail": "session started",
                "consumer_group_name": "alice",
                "topic_name": "orders",
            })
        );
    }

    #[test]
    fn error_carries_only_the_failure() {
        let env = Envelope::error(&BridgeError::connect("broker unreachable"));
        assert_eq!(
            as_value(&env),
            json!({"message": "error", "error": "connect: broker unreachable"})
        );
    }

    #[test]
    fn received_text_payload() {
        let record = BrokerRecord {
            topic: "orders".into(),
            partition: 2,
            offset: 41,
            timestamp_ms: Some(1_700_000_000_000),
            payload: b"x".to_vec(),
        };
        assert_eq!(
            as_value(&Envelope::received("alice", &record)),
            json!({
                "message": "received",
                "consumer_group_name": "alice",
                "topic_name": "orders",
                "value": "x",
                "partition": 2,
                "offset": 41,
                "timestamp": 1_700_000_000_000i64,
            })
        );
    }

    #[test]
    fn received_binary_payload_is_base64() {
        let record = BrokerRecord {
            topic: "orders".into(),
            partition: 0,
            offset: 0,
            timestamp_ms: None,
            payload: vec![0xff, 0x00, 0xfe],
        };
        let value = as_value(&Envelope::received("alice", &record));
        assert_eq!(value["value"], "/wD+");
        assert_eq!(value["value_encoding"], "base64");
        assert!(value.get("timestamp").is_none());
    }

    #[test]
    fn published_carries_metadata() {
        let meta = RecordMetadata {
            topic: "orders".into(),
            partition: 1,
            offset: 7,
            timestamp_ms: Some(5),
            producer_epoch: Some(3),
            producer_id: Some(1001),
            leader_epoch: None,
        };
        assert_eq!(
            as_value(&Envelope::published("alice", &meta)),
            json!({
                "message": "published",
                "consumer_group_name": "alice",
                "topic_name": "orders",
                "partition": 1,
                "offset": 7,
                "timestamp": 5,
                "producer_epoch": 3,
                "producer_id": 1001,
            })
        );
    }
}
