use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use bridge_api::endpoint::{BrokerEndpoint, EndpointFactory, EndpointSpec, PublishFuture};
use bridge_api::error::BridgeError;
use bridge_api::record::{BrokerRecord, ProduceRecord, RecordMetadata};
use bridge_api::util::now_ms;

// ═══════════════════════════════════════════════════════════════
//  Options
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct MemoryBrokerOptions {
    /// Upper bound of records returned by one poll.
    pub max_poll_records: usize,
    /// New groups start at the end of the log instead of the beginning.
    pub start_at_latest: bool,
    /// Create unknown topics on first use.
    pub auto_create_topics: bool,
}

impl Default for MemoryBrokerOptions {
    fn default() -> Self {
        Self {
            max_poll_records: 500,
            start_at_latest: false,
            auto_create_topics: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Topic log
// ═══════════════════════════════════════════════════════════════

/// Append-only log of one topic, single partition.
struct TopicLog {
    name: String,
    records: Mutex<Vec<BrokerRecord>>,
    /// Log length, bumped on every append so pollers wake up.
    appended: watch::Sender<usize>,
}

impl TopicLog {
    fn new(name: &str) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            name: name.to_string(),
            records: Mutex::new(Vec::new()),
            appended,
        }
    }

    fn append(&self, payload: Vec<u8>, timestamp_ms: i64) -> i64 {
        let mut records = lock(&self.records);
        let offset = records.len() as i64;
        records.push(BrokerRecord {
            topic: self.name.clone(),
            partition: 0,
            offset,
            timestamp_ms: Some(timestamp_ms),
            payload,
        });
        let len = records.len();
        drop(records);
        self.appended.send_replace(len);
        offset
    }

    fn read(&self, from: i64, limit: usize) -> Vec<BrokerRecord> {
        let records = lock(&self.records);
        let start = (from.max(0) as usize).min(records.len());
        records[start..].iter().take(limit).cloned().collect()
    }

    fn len(&self) -> i64 {
        lock(&self.records).len() as i64
    }

    fn wake(&self) {
        self.appended.send_modify(|_| {});
    }
}

#[derive(Default)]
struct Faults {
    unreachable: bool,
    poll_error: Option<String>,
    publish_error: Option<String>,
}

struct BrokerState {
    options: MemoryBrokerOptions,
    topics: Mutex<HashMap<String, Arc<TopicLog>>>,
    /// Committed offsets per (group, topic).
    offsets: Mutex<HashMap<(String, String), i64>>,
    faults: Mutex<Faults>,
    next_producer_id: AtomicI64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("memory broker lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

/// In-process broker: per-topic append-only logs and per-group committed
/// offsets. Offsets are committed as soon as a poll returns them.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(MemoryBrokerOptions::default())
    }
}

impl MemoryBroker {
    pub fn new(options: MemoryBrokerOptions) -> Self {
        Self {
            state: Arc::new(BrokerState {
                options,
                topics: Mutex::new(HashMap::new()),
                offsets: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                next_producer_id: AtomicI64::new(1),
            }),
        }
    }

    pub fn create_topic(&self, name: &str) {
        self.ensure_topic(name);
    }

    /// Append a record as an external producer would.
    pub fn append(&self, topic: &str, payload: impl Into<Vec<u8>>) -> i64 {
        self.ensure_topic(topic).append(payload.into(), now_ms())
    }

    /// Snapshot of a topic's log.
    pub fn records(&self, topic: &str) -> Vec<BrokerRecord> {
        lock(&self.state.topics)
            .get(topic)
            .map(|log| log.read(0, usize::MAX))
            .unwrap_or_default()
    }

    pub fn committed_offset(&self, group: &str, topic: &str) -> Option<i64> {
        lock(&self.state.offsets)
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }

    /// Make `connect` fail as if the broker could not be reached.
    pub fn set_unreachable(&self, unreachable: bool) {
        lock(&self.state.faults).unreachable = unreachable;
    }

    /// Make every poll fail with `message` (None clears the fault).
    pub fn set_poll_error(&self, message: Option<&str>) {
        lock(&self.state.faults).poll_error = message.map(str::to_string);
        for log in lock(&self.state.topics).values() {
            log.wake();
        }
    }

    /// Make every publish fail with `message` (None clears the fault).
    pub fn set_publish_error(&self, message: Option<&str>) {
        lock(&self.state.faults).publish_error = message.map(str::to_string);
    }

    fn find_topic(&self, name: &str) -> Option<Arc<TopicLog>> {
        lock(&self.state.topics).get(name).cloned()
    }

    fn ensure_topic(&self, name: &str) -> Arc<TopicLog> {
        lock(&self.state.topics)
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(topic = name, "creating memory topic");
                Arc::new(TopicLog::new(name))
            })
            .clone()
    }

    /// Topic lookup honoring `auto_create_topics`.
    fn resolve_topic(&self, name: &str) -> Option<Arc<TopicLog>> {
        if self.state.options.auto_create_topics {
            Some(self.ensure_topic(name))
        } else {
            self.find_topic(name)
        }
    }
}

impl EndpointFactory for MemoryBroker {
    fn connect(
        &self,
        spec: EndpointSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BrokerEndpoint>, BridgeError>> + Send + '_>> {
        Box::pin(async move {
            if lock(&self.state.faults).unreachable {
                return Err(BridgeError::connect("memory broker unreachable"));
            }
            let log = self
                .resolve_topic(&spec.topic)
                .ok_or_else(|| BridgeError::connect(format!("unknown topic '{}'", spec.topic)))?;

            let key = (spec.group_id.clone(), spec.topic.clone());
            let start = if self.state.options.start_at_latest { log.len() } else { 0 };
            lock(&self.state.offsets).entry(key).or_insert(start);

            let producer_id = self.state.next_producer_id.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(group = %spec.group_id, topic = %spec.topic, producer_id, "memory endpoint connected");
            Ok(Arc::new(MemoryEndpoint {
                broker: self.clone(),
                group: spec.group_id,
                log,
                producer_id,
                closed: AtomicBool::new(false),
            }) as Arc<dyn BrokerEndpoint>)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryEndpoint
// ═══════════════════════════════════════════════════════════════

pub struct MemoryEndpoint {
    broker: MemoryBroker,
    group: String,
    log: Arc<TopicLog>,
    producer_id: i64,
    closed: AtomicBool,
}

impl MemoryEndpoint {
    /// Read from the committed offset and advance it. Empty when caught up.
    fn take_batch(&self) -> Vec<BrokerRecord> {
        let key = (self.group.clone(), self.log.name.clone());
        let mut offsets = lock(&self.broker.state.offsets);
        let offset = offsets.entry(key).or_insert(0);
        let batch = self.log.read(*offset, self.broker.state.options.max_poll_records);
        if let Some(last) = batch.last() {
            *offset = last.offset + 1;
        }
        batch
    }

    fn append_now(&self, record: ProduceRecord) -> Result<RecordMetadata, BridgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::closed("endpoint closed"));
        }
        if let Some(msg) = lock(&self.broker.state.faults).publish_error.clone() {
            return Err(BridgeError::publish(msg));
        }
        let log = self
            .broker
            .resolve_topic(&record.topic)
            .ok_or_else(|| BridgeError::publish(format!("unknown topic '{}'", record.topic)))?;
        let timestamp_ms = now_ms();
        let offset = log.append(record.payload, timestamp_ms);
        Ok(RecordMetadata {
            topic: record.topic,
            partition: 0,
            offset,
            timestamp_ms: Some(timestamp_ms),
            producer_epoch: Some(0),
            producer_id: Some(self.producer_id),
            leader_epoch: Some(0),
        })
    }
}

impl BrokerEndpoint for MemoryEndpoint {
    fn poll(&self) -> Pin<Box<dyn Future<Output = Result<Vec<BrokerRecord>, BridgeError>> + Send + '_>> {
        Box::pin(async move {
            let mut appended = self.log.appended.subscribe();
            loop {
                if self.closed.load(Ordering::Acquire) {
                    return Err(BridgeError::closed("endpoint closed"));
                }
                if let Some(msg) = lock(&self.broker.state.faults).poll_error.clone() {
                    return Err(BridgeError::fetch(msg));
                }
                let batch = self.take_batch();
                if !batch.is_empty() {
                    return Ok(batch);
                }
                if appended.changed().await.is_err() {
                    return Err(BridgeError::fetch(format!("topic '{}' dropped", self.log.name)));
                }
            }
        })
    }

    fn publish(&self, record: ProduceRecord) -> PublishFuture {
        // Appended on submission, so the log keeps submission order.
        let result = self.append_now(record);
        Box::pin(async move { result })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Err(BridgeError::closed("endpoint already closed"));
            }
            self.log.wake();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn spec(group: &str, topic: &str) -> EndpointSpec {
        EndpointSpec {
            group_id: group.into(),
            topic: topic.into(),
        }
    }

    #[tokio::test]
    async fn pending_records_are_polled_in_order() {
        let broker = MemoryBroker::default();
        broker.append("orders", "a");
        broker.append("orders", "b");

        let endpoint = broker.connect(spec("alice", "orders")).await.unwrap();
        let batch = endpoint.poll().await.unwrap();
        let payloads: Vec<_> = batch.iter().map(|r| r.payload.clone()).collect();
        assert_eq!(payloads, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(broker.committed_offset("alice", "orders"), Some(2));
    }

    #[tokio::test]
    async fn poll_waits_for_append() {
        let broker = MemoryBroker::default();
        let endpoint = broker.connect(spec("alice", "orders")).await.unwrap();

        let appender = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            appender.append("orders", "late");
        });

        let batch = tokio::time::timeout(Duration::from_secs(5), endpoint.poll())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"late");
    }

    #[tokio::test]
    async fn groups_have_independent_offsets() {
        let broker = MemoryBroker::default();
        broker.append("orders", "x");

        let alice = broker.connect(spec("alice", "orders")).await.unwrap();
        let bob = broker.connect(spec("bob", "orders")).await.unwrap();
        assert_eq!(alice.poll().await.unwrap().len(), 1);
        assert_eq!(bob.poll().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn latest_start_skips_existing_records() {
        let broker = MemoryBroker::new(MemoryBrokerOptions {
            start_at_latest: true,
            ..Default::default()
        });
        broker.append("orders", "old");
        broker.connect(spec("alice", "orders")).await.unwrap();
        assert_eq!(broker.committed_offset("alice", "orders"), Some(1));
    }

    #[tokio::test]
    async fn batches_respect_max_poll_records() {
        let broker = MemoryBroker::new(MemoryBrokerOptions {
            max_poll_records: 2,
            ..Default::default()
        });
        for p in ["1", "2", "3"] {
            broker.append("orders", p);
        }
        let endpoint = broker.connect(spec("alice", "orders")).await.unwrap();
        assert_eq!(endpoint.poll().await.unwrap().len(), 2);
        assert_eq!(endpoint.poll().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn publish_appends_and_reports_metadata() {
        let broker = MemoryBroker::default();
        let endpoint = broker.connect(spec("alice", "orders")).await.unwrap();

        let meta = endpoint
            .publish(ProduceRecord::new("orders", b"hello".to_vec()))
            .await
            .unwrap();
        assert_eq!(meta.topic, "orders");
        assert_eq!(meta.offset, 0);
        assert!(meta.producer_id.is_some());
        assert_eq!(broker.records("orders")[0].payload, b"hello");
    }

    #[tokio::test]
    async fn faults() {
        let broker = MemoryBroker::default();
        broker.set_unreachable(true);
        let err = broker.connect(spec("alice", "orders")).await.err().unwrap();
        assert_eq!(err.kind, bridge_api::error::ErrorKind::Connect);
        broker.set_unreachable(false);

        let endpoint = broker.connect(spec("alice", "orders")).await.unwrap();
        broker.set_publish_error(Some("not leader"));
        let err = endpoint
            .publish(ProduceRecord::new("orders", b"x".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, bridge_api::error::ErrorKind::Publish);

        broker.set_poll_error(Some("fetch failed"));
        let err = endpoint.poll().await.unwrap_err();
        assert_eq!(err.kind, bridge_api::error::ErrorKind::Fetch);
    }

    #[tokio::test]
    async fn unknown_topic_without_auto_create() {
        let broker = MemoryBroker::new(MemoryBrokerOptions {
            auto_create_topics: false,
            ..Default::default()
        });
        assert!(broker.connect(spec("alice", "orders")).await.is_err());
        broker.create_topic("orders");
        assert!(broker.connect(spec("alice", "orders")).await.is_ok());
    }

    #[tokio::test]
    async fn close_wakes_poller_once() {
        let broker = MemoryBroker::default();
        let endpoint = broker.connect(spec("alice", "orders")).await.unwrap();

        let poller = endpoint.clone();
        let waiting = tokio::spawn(async move { poller.poll().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        endpoint.close().await.unwrap();
        assert!(endpoint.close().await.unwrap_err().is_closed());
        assert!(waiting.await.unwrap().unwrap_err().is_closed());
    }
}
