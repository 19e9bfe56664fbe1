#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Engine(#[from] xstream_engine::error::EngineError),

    #[error("broker: {0}")]
    Broker(#[from] xstream_api::error::BrokerError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task: {0}")]
    Task(#[from] tokio::task::JoinError),
}
