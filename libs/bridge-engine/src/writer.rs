use std::time::Duration;

use tokio::sync::Mutex;

use bridge_api::connection::ClientSink;
use bridge_api::error::BridgeError;

use crate::envelope::Envelope;

/// Bound on the closing handshake with the client.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

struct WriterState {
    sink: Box<dyn ClientSink>,
    closed: bool,
}

/// Outbound writer lock of one session.
///
/// Every envelope written to the client goes through `write`, which holds the
/// lock for exactly one frame. Once `close` has run, writes are refused with a
/// `Closed` error and never reach the sink.
pub struct OutboundWriter {
    state: Mutex<WriterState>,
}

impl OutboundWriter {
    pub fn new(sink: Box<dyn ClientSink>) -> Self {
        Self {
            state: Mutex::new(WriterState { sink, closed: false }),
        }
    }

    /// Serialize and send one envelope.
    pub async fn write(&self, envelope: &Envelope) -> Result<(), BridgeError> {
        // Encode before taking the lock.
        let text = envelope.to_json()?;
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BridgeError::closed("connection already closed"));
        }
        state.sink.send_text(text).await
    }

    /// Close the connection. Only the first call reaches the sink.
    ///
    /// Returns `false` when the writer was already closed.
    pub async fn close(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.closed {
            return false;
        }
        state.closed = true;
        match tokio::time::timeout(CLOSE_TIMEOUT, state.sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "connection close failed"),
            Err(_) => tracing::debug!("connection close timed out"),
        }
        true
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}
