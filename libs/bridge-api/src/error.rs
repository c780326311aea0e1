use std::fmt;

/// Error kind for bridge errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid backend configuration.
    Config,
    /// The broker could not be reached or the topic is unusable.
    Connect,
    /// Fetching records from the broker failed.
    Fetch,
    /// The broker rejected or failed to acknowledge a record.
    Publish,
    /// Reading from or writing to the client connection failed.
    Transport,
    /// The resource was already closed.
    Closed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Connect => f.write_str("connect"),
            ErrorKind::Fetch => f.write_str("fetch"),
            ErrorKind::Publish => f.write_str("publish"),
            ErrorKind::Transport => f.write_str("transport"),
            ErrorKind::Closed => f.write_str("closed"),
        }
    }
}

/// Error returned by broker endpoints and client connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Connect, message: msg.into() }
    }

    pub fn fetch(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Fetch, message: msg.into() }
    }

    pub fn publish(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Publish, message: msg.into() }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Transport, message: msg.into() }
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Closed, message: msg.into() }
    }

    pub fn is_closed(&self) -> bool {
        self.kind == ErrorKind::Closed
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BridgeError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → BridgeError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        Self::transport(e.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        Self::transport(format!("encode: {e}"))
    }
}
