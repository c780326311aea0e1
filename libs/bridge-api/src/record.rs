/// A record fetched from the broker.
///
/// `payload` is opaque bytes; the bridge never interprets them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Broker timestamp in milliseconds, when the broker reports one.
    pub timestamp_ms: Option<i64>,
    pub payload: Vec<u8>,
}

/// A record submitted by the client for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceRecord {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl ProduceRecord {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Broker-assigned metadata of an acknowledged record.
///
/// Epoch and producer id fields are only filled by backends that expose them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: Option<i64>,
    pub producer_epoch: Option<i16>,
    pub producer_id: Option<i64>,
    pub leader_epoch: Option<i32>,
}
