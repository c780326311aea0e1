use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::BridgeError;
use crate::record::{BrokerRecord, ProduceRecord, RecordMetadata};

/// Completion of a single publish. Resolves exactly once.
///
/// The future is `'static` so it can be awaited on a task other than the one
/// that submitted the record.
pub type PublishFuture = Pin<Box<dyn Future<Output = Result<RecordMetadata, BridgeError>> + Send>>;

/// What a session asks the broker for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Consumer group the endpoint joins. Sessions use their client id.
    pub group_id: String,
    /// The single topic the endpoint consumes from and publishes to.
    pub topic: String,
}

/// A connected broker client bound to one topic.
///
/// Owned by exactly one session. The session's forward loop calls `poll`,
/// its ingest loop calls `publish`, and its teardown calls `close` once.
pub trait BrokerEndpoint: Send + Sync {
    /// Wait for the next batch of records. Suspends until at least one record
    /// is available or the broker fails.
    fn poll(&self) -> Pin<Box<dyn Future<Output = Result<Vec<BrokerRecord>, BridgeError>> + Send + '_>>;

    /// Submit a record. Returns immediately; the returned future resolves when
    /// the broker acknowledges or rejects the record.
    fn publish(&self, record: ProduceRecord) -> PublishFuture;

    /// Release broker resources.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;
}

/// Creates broker endpoints. Broker addresses and client settings belong to
/// the factory; `EndpointSpec` only names the group and the topic.
pub trait EndpointFactory: Send + Sync {
    #[allow(clippy::type_complexity)]
    fn connect(
        &self,
        spec: EndpointSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BrokerEndpoint>, BridgeError>> + Send + '_>>;
}
