use std::future::Future;
use std::pin::Pin;

use crate::error::BridgeError;

/// One message read from the client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Payload to publish (text or binary frame contents).
    Payload(Vec<u8>),
    /// Control traffic (ping/pong). Nothing to publish.
    Control,
}

/// Write half of a client connection.
///
/// Not internally synchronized: the session serializes access through its
/// outbound writer lock.
pub trait ClientSink: Send {
    /// Send one text frame.
    fn send_text(&mut self, text: String) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;

    /// Close the connection.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;
}

/// Read half of a client connection.
pub trait ClientStream: Send {
    /// Next message. `None` = the client closed the connection.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<Inbound, BridgeError>>> + Send + '_>>;
}

/// A split client connection handed to a session.
pub struct ClientConnection {
    pub sink: Box<dyn ClientSink>,
    pub stream: Box<dyn ClientStream>,
}

impl ClientConnection {
    pub fn new(sink: Box<dyn ClientSink>, stream: Box<dyn ClientStream>) -> Self {
        Self { sink, stream }
    }
}
