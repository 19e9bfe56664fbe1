use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use xstream_api::message::Message;

use crate::block::{read_block, AckMode, BlockLimits};
use crate::error::EngineError;
use crate::reader::StreamReader;
use crate::table::StreamsTable;

/// Destination of blocks read from a table.
pub trait BlockSink: Send + Sync {
    /// Persist one block. An error leaves the block's entries pending.
    fn write_block(&self, table: &str, messages: &[Message]) -> Result<(), EngineError>;
}

// ═══════════════════════════════════════════════════════════════
//  Streaming tasks: consumers → read_block → sink
// ═══════════════════════════════════════════════════════════════

/// Running streaming tasks of one table.
pub struct Streaming {
    table: String,
    handles: Vec<JoinHandle<Result<(), EngineError>>>,
}

impl Streaming {
    pub fn tasks(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every task; the first failure is returned after all finished.
    pub async fn join(self) -> Result<(), EngineError> {
        let mut first_err = None;
        for handle in self.handles {
            let result = match handle.await {
                Ok(r) => r,
                Err(e) => Err(EngineError::Task(e.to_string())),
            };
            if let Err(e) = result {
                tracing::error!(table = %self.table, error = %e, "streaming task failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Move the table's consumers into blocking streaming loops.
///
/// One task per consumer with `redis_thread_per_consumer`, otherwise one
/// task serving all consumers in turn. Tasks stop between blocks once
/// `token` is cancelled; a poll already blocking is not interrupted. On exit
/// consumers go back to the table's pool.
pub fn spawn_streaming(
    table: Arc<StreamsTable>,
    sink: Arc<dyn BlockSink>,
    token: CancellationToken,
) -> Streaming {
    let consumers = table.take_consumers();
    let limits = table.block_limits();
    let mode = table.settings().ack_mode();

    let groups: Vec<Vec<StreamReader>> = if table.settings().redis_thread_per_consumer {
        consumers.into_iter().map(|c| vec![c]).collect()
    } else if consumers.is_empty() {
        Vec::new()
    } else {
        vec![consumers]
    };

    tracing::info!(
        table = %table.name(),
        tasks = groups.len(),
        ack_mode = ?mode,
        max_rows = limits.max_rows,
        "streaming started"
    );

    let handles = groups
        .into_iter()
        .map(|mut readers| {
            let table = table.clone();
            let sink = sink.clone();
            let token = token.clone();
            let limits = limits.clone();
            tokio::task::spawn_blocking(move || {
                let result = stream_loop(table.name(), &mut readers, &*sink, &limits, mode, &token);
                table.return_consumers(readers);
                if result.is_ok() {
                    tracing::info!(table = %table.name(), "streaming stopped");
                }
                result
            })
        })
        .collect();

    Streaming {
        table: table.name().to_string(),
        handles,
    }
}

fn stream_loop(
    table: &str,
    readers: &mut [StreamReader],
    sink: &dyn BlockSink,
    limits: &BlockLimits,
    mode: AckMode,
    token: &CancellationToken,
) -> Result<(), EngineError> {
    if readers.is_empty() {
        return Ok(());
    }
    'outer: loop {
        for reader in readers.iter_mut() {
            if token.is_cancelled() {
                break 'outer;
            }
            stream_block(table, reader, sink, limits, mode)?;
        }
    }
    Ok(())
}

/// Read one block from `reader` and hand it to `sink`. Returns rows written.
pub fn stream_block(
    table: &str,
    reader: &mut StreamReader,
    sink: &dyn BlockSink,
    limits: &BlockLimits,
    mode: AckMode,
) -> Result<usize, EngineError> {
    let block = read_block(reader, limits, mode == AckMode::EveryBatch)?;
    if block.is_empty() {
        return Ok(0);
    }

    match sink.write_block(table, &block) {
        Ok(()) => {
            if mode == AckMode::AfterWrite {
                reader.ack()?;
            }
            tracing::debug!(%table, consumer = %reader.identity().consumer(), rows = block.len(), "block written");
            Ok(block.len())
        }
        Err(e) => {
            let pending = reader.forget_delivered();
            tracing::warn!(
                %table,
                consumer = %reader.identity().consumer(),
                rows = block.len(),
                pending,
                error = %e,
                "sink write failed, messages left pending"
            );
            Ok(0)
        }
    }
}
