use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use bridge_api::endpoint::{BrokerEndpoint, EndpointFactory, EndpointSpec, PublishFuture};
use bridge_api::error::BridgeError;
use bridge_api::record::{BrokerRecord, ProduceRecord, RecordMetadata};
use bridge_api::util::now_ms;

// ═══════════════════════════════════════════════════════════════
//  Options
// ═══════════════════════════════════════════════════════════════

/// Client settings shared by every endpoint the factory creates.
#[derive(Debug, Clone)]
pub struct KafkaOptions {
    pub seed_brokers: Vec<String>,
    /// Bound of the metadata probe run when an endpoint is created.
    pub connect_timeout: Duration,
    pub max_poll_records: usize,
    /// Delivery timeout of a produced record (`message.timeout.ms`).
    pub send_timeout: Duration,
    /// Where a group without committed offsets starts.
    pub auto_offset_reset: String,
    /// Raw librdkafka properties, applied last.
    pub properties: BTreeMap<String, String>,
}

impl Default for KafkaOptions {
    fn default() -> Self {
        Self {
            seed_brokers: vec!["localhost:9092".to_string()],
            connect_timeout: Duration::from_secs(5),
            max_poll_records: 500,
            send_timeout: Duration::from_secs(30),
            auto_offset_reset: "earliest".to_string(),
            properties: BTreeMap::new(),
        }
    }
}

impl KafkaOptions {
    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", self.seed_brokers.join(","));
        config
    }

    fn apply_properties(&self, config: &mut ClientConfig) {
        for (key, value) in &self.properties {
            config.set(key, value);
        }
    }

    /// Consumer joining `group` with automatic offset commits.
    pub fn consumer_config(&self, group: &str) -> ClientConfig {
        let mut config = self.base_config();
        config
            .set("group.id", group)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("enable.partition.eof", "false");
        self.apply_properties(&mut config);
        config
    }

    pub fn producer_config(&self) -> ClientConfig {
        let mut config = self.base_config();
        config.set("message.timeout.ms", self.send_timeout.as_millis().to_string());
        self.apply_properties(&mut config);
        config
    }
}

// ═══════════════════════════════════════════════════════════════
//  Factory
// ═══════════════════════════════════════════════════════════════

/// Creates one consumer/producer pair per endpoint.
pub struct KafkaEndpointFactory {
    options: KafkaOptions,
}

impl KafkaEndpointFactory {
    pub fn new(options: KafkaOptions) -> Self {
        Self { options }
    }
}

impl EndpointFactory for KafkaEndpointFactory {
    fn connect(
        &self,
        spec: EndpointSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BrokerEndpoint>, BridgeError>> + Send + '_>> {
        Box::pin(async move {
            let producer: FutureProducer = self
                .options
                .producer_config()
                .create()
                .map_err(|e| BridgeError::connect(format!("create producer: {e}")))?;

            probe_topic(&producer, &spec.topic, self.options.connect_timeout).await?;

            let consumer: StreamConsumer = self
                .options
                .consumer_config(&spec.group_id)
                .create()
                .map_err(|e| BridgeError::connect(format!("create consumer: {e}")))?;
            consumer
                .subscribe(&[spec.topic.as_str()])
                .map_err(|e| BridgeError::connect(format!("subscribe: {e}")))?;

            tracing::debug!(group = %spec.group_id, topic = %spec.topic, "kafka endpoint connected");
            Ok(Arc::new(KafkaEndpoint {
                topic: spec.topic,
                consumer,
                producer,
                max_poll_records: self.options.max_poll_records.max(1),
                flush_timeout: self.options.send_timeout,
                closed: AtomicBool::new(false),
            }) as Arc<dyn BrokerEndpoint>)
        })
    }
}

/// Fetch metadata for `topic`. Fails when no broker answers within `timeout`
/// or the broker reports an error for the topic.
async fn probe_topic(producer: &FutureProducer, topic: &str, timeout: Duration) -> Result<(), BridgeError> {
    let producer = producer.clone();
    let topic = topic.to_string();
    tokio::task::spawn_blocking(move || {
        let metadata = producer
            .client()
            .fetch_metadata(Some(&topic), Timeout::After(timeout))
            .map_err(|e| BridgeError::connect(format!("metadata: {e}")))?;
        let entry = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .ok_or_else(|| BridgeError::connect("topic missing from metadata"))?;
        match entry.error() {
            Some(code) => Err(BridgeError::connect(format!(
                "metadata: {}",
                RDKafkaErrorCode::from(code)
            ))),
            None => Ok(()),
        }
    })
    .await
    .map_err(|e| BridgeError::connect(format!("metadata probe: {e}")))?
}

// ═══════════════════════════════════════════════════════════════
//  Endpoint
// ═══════════════════════════════════════════════════════════════

pub struct KafkaEndpoint {
    topic: String,
    consumer: StreamConsumer,
    producer: FutureProducer,
    max_poll_records: usize,
    flush_timeout: Duration,
    closed: AtomicBool,
}

fn to_record(msg: &BorrowedMessage<'_>) -> BrokerRecord {
    BrokerRecord {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        timestamp_ms: msg.timestamp().to_millis(),
        payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

impl BrokerEndpoint for KafkaEndpoint {
    fn poll(&self) -> Pin<Box<dyn Future<Output = Result<Vec<BrokerRecord>, BridgeError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(BridgeError::closed("endpoint closed"));
            }

            let first = self
                .consumer
                .recv()
                .await
                .map(|msg| to_record(&msg))
                .map_err(|e| BridgeError::fetch(e.to_string()))?;
            let mut batch = vec![first];

            // Drain what is already buffered without waiting.
            while batch.len() < self.max_poll_records {
                let next = tokio::time::timeout(Duration::ZERO, self.consumer.recv())
                    .await
                    .map(|r| r.map(|msg| to_record(&msg)));
                match next {
                    Ok(Ok(record)) => batch.push(record),
                    Ok(Err(e)) => {
                        // Surfaced again by the next poll if it persists.
                        tracing::warn!(topic = %self.topic, error = %e, "kafka consumer error while draining");
                        break;
                    }
                    Err(_) => break,
                }
            }
            Ok(batch)
        })
    }

    fn publish(&self, record: ProduceRecord) -> PublishFuture {
        if self.closed.load(Ordering::Acquire) {
            return Box::pin(async { Err(BridgeError::closed("endpoint closed")) });
        }

        // Enqueued here, so records reach the producer in submission order.
        let timestamp = now_ms();
        let enqueued = self.producer.send_result(
            FutureRecord::<(), [u8]>::to(&record.topic)
                .payload(record.payload.as_slice())
                .timestamp(timestamp),
        );
        let delivery = match enqueued {
            Ok(delivery) => delivery,
            Err((e, _)) => {
                let err = BridgeError::publish(e.to_string());
                return Box::pin(async move { Err(err) });
            }
        };

        let topic = record.topic;
        Box::pin(async move {
            match delivery.await {
                Ok(Ok((partition, offset))) => Ok(RecordMetadata {
                    topic,
                    partition,
                    offset,
                    timestamp_ms: Some(timestamp),
                    ..Default::default()
                }),
                Ok(Err((e, _))) => Err(BridgeError::publish(e.to_string())),
                Err(_) => Err(BridgeError::publish("delivery canceled")),
            }
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Err(BridgeError::closed("endpoint already closed"));
            }
            self.consumer.unsubscribe();

            let producer = self.producer.clone();
            let timeout = self.flush_timeout;
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| BridgeError::transport(format!("flush task: {e}")))?
                .map_err(|e| BridgeError::publish(format!("flush: {e}")))?;
            tracing::debug!(topic = %self.topic, "kafka endpoint closed");
            Ok(())
        })
    }
}
