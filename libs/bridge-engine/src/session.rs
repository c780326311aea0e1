use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use bridge_api::connection::{ClientConnection, ClientStream, Inbound};
use bridge_api::endpoint::{BrokerEndpoint, EndpointFactory, EndpointSpec};
use bridge_api::error::BridgeError;
use bridge_api::record::ProduceRecord;
use bridge_api::util::is_valid_identifier;

use crate::envelope::Envelope;
use crate::error::EngineError;
use crate::registry::{SessionGuard, SessionRegistry};
use crate::writer::OutboundWriter;

/// Everything a session needs from the server that hosts it.
#[derive(Clone)]
pub struct SessionContext {
    pub factory: Arc<dyn EndpointFactory>,
    pub registry: Arc<SessionRegistry>,
    /// Server-wide shutdown. Every session token is a child of it.
    pub shutdown: CancellationToken,
}

impl SessionContext {
    pub fn new(factory: Arc<dyn EndpointFactory>) -> Self {
        Self {
            factory,
            registry: Arc::new(SessionRegistry::new()),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Why a session ended. The first fatal condition wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed the connection.
    ClientClosed,
    /// Reading from the client failed.
    ReadFailed(BridgeError),
    /// Writing to the client failed.
    WriteFailed(BridgeError),
    /// Polling the broker failed.
    FetchFailed(BridgeError),
    /// The server is shutting down.
    Shutdown,
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEnd::ClientClosed => f.write_str("client closed"),
            SessionEnd::ReadFailed(e) => write!(f, "read failed: {e}"),
            SessionEnd::WriteFailed(e) => write!(f, "write failed: {e}"),
            SessionEnd::FetchFailed(e) => write!(f, "fetch failed: {e}"),
            SessionEnd::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// How long a failing session waits for the client to take its last error
/// envelope.
const REPORT_TIMEOUT: Duration = Duration::from_secs(1);

/// Session-scoped cancellation plus the recorded reason.
#[derive(Clone)]
struct Terminator {
    token: CancellationToken,
    end: Arc<OnceLock<SessionEnd>>,
}

impl Terminator {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            end: Arc::new(OnceLock::new()),
        }
    }

    /// Stop both activities. Later calls keep the first reason.
    fn terminate(&self, end: SessionEnd) {
        let _ = self.end.set(end);
        self.token.cancel();
    }

    fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }

    fn reason(&self) -> SessionEnd {
        self.end.get().cloned().unwrap_or(SessionEnd::Shutdown)
    }

    /// Write unless the session is torn down first. An abandoned write
    /// releases the writer lock.
    async fn write(&self, writer: &OutboundWriter, envelope: &Envelope) -> Result<(), BridgeError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(BridgeError::closed("session terminated")),
            written = writer.write(envelope) => written,
        }
    }

    /// Best-effort error report before a fatal termination. Bounded, since a
    /// client that stopped reading may never take the frame.
    async fn report(&self, writer: &OutboundWriter, err: &BridgeError) -> Result<(), BridgeError> {
        match tokio::time::timeout(REPORT_TIMEOUT, self.write(writer, &Envelope::error(err))).await {
            Ok(written) => written,
            Err(_) => Err(BridgeError::transport("client did not take the error report")),
        }
    }
}

/// A bridge between one client connection and one broker topic.
///
/// Created by [`Session::open`], driven by [`Session::run`]. The session owns
/// its outbound writer lock; nothing outside the session can write to the
/// connection.
pub struct Session {
    client_id: String,
    topic: String,
    writer: Arc<OutboundWriter>,
    endpoint: Arc<dyn BrokerEndpoint>,
    stream: Box<dyn ClientStream>,
    terminator: Terminator,
    guard: SessionGuard,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.guard.id())
            .field("client_id", &self.client_id)
            .field("topic", &self.topic)
            .finish()
    }
}

/// Check a routing identifier before anything is allocated for it.
pub fn validate_route(field: &'static str, value: &str) -> Result<(), EngineError> {
    if is_valid_identifier(value) {
        Ok(())
    } else {
        Err(EngineError::InvalidRoute {
            field,
            value: value.to_string(),
        })
    }
}

impl Session {
    /// Open a session: validate the route, connect the broker endpoint and
    /// announce the session to the client.
    ///
    /// On failure the client gets one `error` envelope and the connection is
    /// closed; no activity is started.
    pub async fn open(
        client_id: &str,
        topic: &str,
        connection: ClientConnection,
        ctx: &SessionContext,
    ) -> Result<Session, EngineError> {
        let ClientConnection { sink, stream } = connection;
        let writer = Arc::new(OutboundWriter::new(sink));

        let route = validate_route("client_id", client_id).and_then(|()| validate_route("topic", topic));
        if let Err(e) = route {
            reject(&writer, &BridgeError::config(e.to_string())).await;
            return Err(e);
        }

        let spec = EndpointSpec {
            group_id: client_id.to_string(),
            topic: topic.to_string(),
        };
        let connected = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => Err(BridgeError::closed("server shutting down")),
            connected = ctx.factory.connect(spec) => connected,
        };
        let endpoint = match connected {
            Ok(endpoint) => endpoint,
            Err(e) => {
                let e = e.with_context(format!("topic '{topic}'"));
                tracing::warn!(client_id, topic, error = %e, "broker endpoint unavailable");
                reject(&writer, &e).await;
                return Err(e.into());
            }
        };

        let started = Envelope::status(client_id, topic, "session started");
        let announced = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => Err(BridgeError::closed("server shutting down")),
            written = writer.write(&started) => written,
        };
        if let Err(e) = announced {
            tracing::debug!(client_id, topic, error = %e, "client gone before session start");
            writer.close().await;
            if let Err(e) = endpoint.close().await {
                tracing::debug!(client_id, topic, error = %e, "endpoint close failed");
            }
            return Err(e.into());
        }

        let guard = ctx.registry.register(client_id, topic);
        tracing::info!(session = guard.id(), client_id, topic, "session started");

        Ok(Session {
            client_id: client_id.to_string(),
            topic: topic.to_string(),
            writer,
            endpoint,
            stream,
            terminator: Terminator::new(ctx.shutdown.child_token()),
            guard,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Liveness flag: false once either activity hit a fatal condition.
    pub fn is_alive(&self) -> bool {
        !self.terminator.is_terminated()
    }

    /// Run forward and ingest until the first fatal condition, then close the
    /// connection and the broker endpoint, each exactly once.
    pub async fn run(self) -> SessionEnd {
        let Session {
            client_id,
            topic,
            writer,
            endpoint,
            mut stream,
            terminator,
            guard,
        } = self;
        let session = guard.id();

        let mut forward = tokio::spawn(forward(
            session,
            client_id.clone(),
            endpoint.clone(),
            writer.clone(),
            terminator.clone(),
        ));

        let acks = TaskTracker::new();
        ingest(
            session,
            &client_id,
            &topic,
            stream.as_mut(),
            &endpoint,
            &writer,
            &terminator,
            &acks,
        )
        .await;

        // Ingest only returns once the token is cancelled; forward gets a
        // short grace period and is aborted if a write holds it up.
        let joined = match tokio::time::timeout(REPORT_TIMEOUT, &mut forward).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::debug!(session, "forward stuck after termination, aborting");
                forward.abort();
                forward.await
            }
        };
        match joined {
            Err(e) if e.is_panic() => {
                tracing::error!(session, error = %e, "forward task failed");
                terminator.terminate(SessionEnd::FetchFailed(BridgeError::fetch(e.to_string())));
            }
            _ => {}
        }

        // Connection first: completions still in flight find it closed and
        // drop their envelopes.
        writer.close().await;
        if let Err(e) = endpoint.close().await {
            tracing::debug!(session, error = %e, "endpoint close failed");
        }
        acks.close();
        drop(stream);

        let end = terminator.reason();
        tracing::info!(
            session,
            client_id = %client_id,
            topic = %topic,
            pending_acks = acks.len(),
            reason = %end,
            "session closed"
        );
        end
    }
}

/// Open a session and run it to completion.
pub async fn bridge(
    client_id: &str,
    topic: &str,
    connection: ClientConnection,
    ctx: &SessionContext,
) -> Result<SessionEnd, EngineError> {
    let session = Session::open(client_id, topic, connection, ctx).await?;
    Ok(session.run().await)
}

/// Report a setup failure and close the connection.
async fn reject(writer: &OutboundWriter, err: &BridgeError) {
    if let Err(e) = writer.write(&Envelope::error(err)).await {
        tracing::debug!(error = %e, "could not report setup failure");
    }
    writer.close().await;
}

/// Broker → client. Polls sequentially, so fetch order is preserved.
async fn forward(
    session: u64,
    client_id: String,
    endpoint: Arc<dyn BrokerEndpoint>,
    writer: Arc<OutboundWriter>,
    terminator: Terminator,
) {
    loop {
        let polled = tokio::select! {
            biased;
            _ = terminator.token.cancelled() => return,
            polled = endpoint.poll() => polled,
        };

        let batch = match polled {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(session, error = %e, "poll failed, closing session");
                if let Err(we) = terminator.report(&writer, &e).await {
                    tracing::debug!(session, error = %we, "could not report poll failure");
                }
                terminator.terminate(SessionEnd::FetchFailed(e));
                return;
            }
        };

        tracing::trace!(session, records = batch.len(), "forwarding batch");
        for record in &batch {
            if terminator.is_terminated() {
                return;
            }
            if let Err(e) = terminator.write(&writer, &Envelope::received(&client_id, record)).await {
                if !terminator.is_terminated() {
                    tracing::debug!(session, error = %e, "forward write failed");
                    terminator.terminate(SessionEnd::WriteFailed(e));
                }
                return;
            }
        }
    }
}

/// Client → broker. Owns the read half; publishes are not awaited here.
#[allow(clippy::too_many_arguments)]
async fn ingest(
    session: u64,
    client_id: &str,
    topic: &str,
    stream: &mut dyn ClientStream,
    endpoint: &Arc<dyn BrokerEndpoint>,
    writer: &Arc<OutboundWriter>,
    terminator: &Terminator,
    acks: &TaskTracker,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = terminator.token.cancelled() => return,
            next = stream.recv() => next,
        };

        let (err, end) = match next {
            Some(Ok(Inbound::Payload(payload))) => {
                tracing::trace!(session, bytes = payload.len(), "publishing client message");
                let completion = endpoint.publish(ProduceRecord::new(topic, payload));
                let writer = writer.clone();
                let terminator = terminator.clone();
                let client_id = client_id.to_string();
                acks.spawn(async move {
                    let envelope = match completion.await {
                        Ok(meta) => Envelope::published(&client_id, &meta),
                        Err(e) => {
                            tracing::warn!(session, error = %e, "publish failed");
                            Envelope::error(&e)
                        }
                    };
                    match terminator.write(&writer, &envelope).await {
                        Ok(()) => {}
                        Err(e) if e.is_closed() => {
                            tracing::debug!(session, "connection closed, acknowledgement dropped");
                        }
                        Err(e) => terminator.terminate(SessionEnd::WriteFailed(e)),
                    }
                });
                continue;
            }
            Some(Ok(Inbound::Control)) => continue,
            Some(Err(e)) => (e.clone(), SessionEnd::ReadFailed(e)),
            None => (
                BridgeError::transport("connection closed by client"),
                SessionEnd::ClientClosed,
            ),
        };

        tracing::debug!(session, error = %err, "ingest stopped");
        if let Err(e) = terminator.report(writer, &err).await {
            tracing::debug!(session, error = %e, "could not report read failure");
        }
        terminator.terminate(end);
        return;
    }
}
