use xstream_api::error::BrokerError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("payload error: {0}")]
    Payload(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task error: {0}")]
    Task(String),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Broker` variant, context is added to the inner `BrokerError`.
    /// For other variants, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Broker(e) => EngineError::Broker(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::Payload(msg) => EngineError::Payload(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}
