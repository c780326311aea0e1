use bridge_api::error::BridgeError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid {field} '{value}': expected one or more lowercase letters")]
    InvalidRoute { field: &'static str, value: String },

    #[error("broker error: {0}")]
    Broker(#[from] BridgeError),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Broker` variant, context is added to the inner `BridgeError`.
    /// For `Config`, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Broker(e) => EngineError::Broker(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}
