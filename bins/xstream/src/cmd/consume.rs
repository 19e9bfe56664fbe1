use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use xstream_api::message::Message;
use xstream_engine::error::EngineError;
use xstream_engine::streaming::{spawn_streaming, BlockSink};

use crate::config::TableArgs;
use crate::error::CliError;

/// Writes blocks to stdout as JSON lines.
struct StdoutSink {
    out: Mutex<std::io::Stdout>,
}

impl BlockSink for StdoutSink {
    fn write_block(&self, _table: &str, messages: &[Message]) -> Result<(), EngineError> {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        super::write_json_lines(&mut *out, messages).map_err(|e| match e {
            CliError::Io(e) => EngineError::Io(e),
            other => EngineError::Io(std::io::Error::other(other.to_string())),
        })
    }
}

pub async fn run(config: &str, args: TableArgs) -> Result<(), CliError> {
    let config = config.to_string();
    let table = tokio::task::spawn_blocking(move || super::open_table(&config, &args.table)).await??;
    let table = Arc::new(table);

    let token = CancellationToken::new();
    let sink = Arc::new(StdoutSink {
        out: Mutex::new(std::io::stdout()),
    });
    let streaming = spawn_streaming(table.clone(), sink, token.clone());
    tracing::info!(table = %table.name(), tasks = streaming.tasks(), "consuming, press Ctrl+C to stop");

    let join = streaming.join();
    tokio::pin!(join);
    let result = tokio::select! {
        result = &mut join => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
            token.cancel();
            join.await
        }
    };

    let cleanup = table.clone();
    tokio::task::spawn_blocking(move || cleanup.shutdown()).await??;
    tracing::info!("shutdown complete");
    Ok(result?)
}
