use std::time::{Duration, Instant};

use xstream_api::message::Message;

use crate::error::EngineError;
use crate::reader::{PollState, StreamReader};

pub const DEFAULT_MAX_BLOCK_ROWS: usize = 65536;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(7500);
/// Shortest read-group block time; brokers read a zero block as "forever".
const MIN_POLL_BLOCK: Duration = Duration::from_millis(1);

/// When a consumer acknowledges on the read-to-insert path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// After every drained poll batch, before the block is written.
    EveryBatch,
    /// Once the whole block was accepted by the sink.
    AfterWrite,
}

/// Bounds of one block collected from a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLimits {
    pub max_rows: usize,
    pub flush_interval: Duration,
}

impl Default for BlockLimits {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_BLOCK_ROWS,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Collect up to `limits.max_rows` messages from `reader`.
///
/// Drains the current batch first, then polls again, until the row limit
/// is hit, the flush interval is over or a poll finds nothing. Every poll
/// blocks at most until the flush interval ends, even when the reader's own
/// timeout is zero. Messages of a partially drained batch stay in the reader
/// for the next block.
pub fn read_block(
    reader: &mut StreamReader,
    limits: &BlockLimits,
    ack_every_batch: bool,
) -> Result<Vec<Message>, EngineError> {
    let started = Instant::now();
    let mut block = Vec::new();

    loop {
        while block.len() < limits.max_rows {
            match reader.next_message() {
                Some(message) => block.push(message.clone()),
                None => break,
            }
        }

        if ack_every_batch && !reader.has_more_polled_messages() {
            reader.ack()?;
        }

        if block.len() >= limits.max_rows || started.elapsed() >= limits.flush_interval {
            break;
        }
        let block_time = poll_block_time(reader.poll_timeout(), limits.flush_interval, started.elapsed());
        if reader.poll_blocking(block_time)? == PollState::NoMessages {
            break;
        }
    }

    tracing::debug!(
        consumer = %reader.identity().consumer(),
        rows = block.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "block collected"
    );
    Ok(block)
}

/// Block time of the next poll: the reader timeout, cut to what is left of
/// the flush interval.
fn poll_block_time(poll_timeout: Duration, flush_interval: Duration, elapsed: Duration) -> Duration {
    let left = flush_interval.saturating_sub(elapsed).max(MIN_POLL_BLOCK);
    if poll_timeout.is_zero() {
        left
    } else {
        poll_timeout.min(left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn zero_timeout_is_bounded_by_flush_interval() {
        assert_eq!(poll_block_time(Duration::ZERO, ms(100), ms(30)), ms(70));
    }

    #[test]
    fn reader_timeout_is_cut_to_interval_left() {
        assert_eq!(poll_block_time(ms(10), ms(100), ms(30)), ms(10));
        assert_eq!(poll_block_time(ms(500), ms(100), ms(30)), ms(70));
    }

    #[test]
    fn spent_interval_never_yields_zero() {
        assert_eq!(poll_block_time(Duration::ZERO, ms(100), ms(250)), MIN_POLL_BLOCK);
        assert_eq!(poll_block_time(ms(10), ms(100), ms(100)), MIN_POLL_BLOCK);
    }
}
