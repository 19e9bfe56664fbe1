use std::collections::HashSet;
use std::time::{Duration, Instant};

use xstream_api::broker::{ReadGroupRequest, StreamBroker};
use xstream_api::entry::{Entry, EntryId};
use xstream_api::error::BrokerError;
use xstream_api::message::Message;

use crate::claim::{ClaimOptions, ClaimResolver};
use crate::cursor::{ConsumerIdentity, CursorRegistry};
use crate::error::EngineError;

/// Outcome of the most recent poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// The batch holds messages from the last poll.
    NotStalled,
    /// The last poll (or no poll yet) returned nothing.
    NoMessages,
}

impl PollState {
    pub fn is_stalled(&self) -> bool {
        *self != PollState::NotStalled
    }
}

/// Read-side tuning, taken from the table settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Read-group COUNT, 0 is unbounded.
    pub poll_batch_size: usize,
    /// Read-group block time. Zero blocks until data arrives.
    pub poll_timeout: Duration,
    pub claim: ClaimOptions,
    /// Replay this consumer's own pending history before reading new entries.
    pub recover_pending: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            poll_batch_size: 0,
            poll_timeout: Duration::ZERO,
            claim: ClaimOptions::default(),
            recover_pending: false,
        }
    }
}

/// Messages of the last poll with a forward-only read position.
#[derive(Debug, Default)]
struct Batch {
    /// `(cursor index, message)` in delivery order.
    messages: Vec<(usize, Message)>,
    position: usize,
}

impl Batch {
    fn replace(&mut self, messages: Vec<(usize, Message)>) {
        self.messages = messages;
        self.position = 0;
    }

    fn has_more(&self) -> bool {
        self.position < self.messages.len()
    }

    fn advance(&mut self) -> Option<&(usize, Message)> {
        let item = self.messages.get(self.position)?;
        self.position += 1;
        Some(item)
    }

    fn current(&self) -> Option<&Message> {
        self.position
            .checked_sub(1)
            .and_then(|i| self.messages.get(i))
            .map(|(_, m)| m)
    }

    fn remaining(&self) -> usize {
        self.messages.len() - self.position
    }
}

/// Consumer side of the bridge: polls all subscribed streams as one group
/// member and hands out messages one at a time.
///
/// Driven synchronously by one host context: `poll`, drain with
/// `next_message`, then `ack`.
pub struct StreamReader {
    broker: Box<dyn StreamBroker>,
    identity: ConsumerIdentity,
    cursors: CursorRegistry,
    claims: ClaimResolver,
    poll_batch_size: usize,
    poll_timeout: Duration,
    state: PollState,
    batch: Batch,
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("identity", &self.identity)
            .field("cursors", &self.cursors)
            .field("state", &self.state)
            .finish()
    }
}

impl StreamReader {
    pub fn new(
        broker: Box<dyn StreamBroker>,
        identity: ConsumerIdentity,
        streams: &[String],
        options: ReaderOptions,
    ) -> Self {
        Self {
            broker,
            identity,
            cursors: CursorRegistry::new(streams, options.recover_pending),
            claims: ClaimResolver::new(options.claim),
            poll_batch_size: options.poll_batch_size,
            poll_timeout: options.poll_timeout,
            state: PollState::NoMessages,
            batch: Batch::default(),
        }
    }

    pub fn identity(&self) -> &ConsumerIdentity {
        &self.identity
    }

    pub fn cursors(&self) -> &CursorRegistry {
        &self.cursors
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn is_stalled(&self) -> bool {
        self.state.is_stalled()
    }

    /// Replace the batch with reclaimed and new entries of every stream.
    ///
    /// Per stream, reclaimed entries come before freshly read ones; streams
    /// follow subscription order. No ordering by entry id across streams.
    pub fn poll(&mut self) -> Result<PollState, EngineError> {
        self.poll_blocking(self.poll_timeout)
    }

    /// `poll` with a read-group block time other than the configured one.
    /// Zero blocks until data arrives.
    pub fn poll_blocking(&mut self, block: Duration) -> Result<PollState, EngineError> {
        let mut per_stream: Vec<Vec<Entry>> = vec![Vec::new(); self.cursors.len()];
        let mut fresh_max: Vec<Option<EntryId>> = vec![None; self.cursors.len()];

        // --- 1. Reclaim stale pending entries ---
        let now = Instant::now();
        for (idx, cursor) in self.cursors.iter_mut().enumerate() {
            if !self.claims.is_due(cursor, now) {
                continue;
            }
            cursor.mark_claim_attempt(now);
            let report = self
                .claims
                .reclaim(&mut *self.broker, &self.identity, cursor.stream())
                .map_err(|e| e.with_context(format!("reclaim on stream '{}'", cursor.stream())))?;
            per_stream[idx].extend(report.into_entries());
        }

        // --- 2. Read new entries of all streams in one call ---
        let positions = self.cursors.read_positions();
        let request = ReadGroupRequest {
            group: self.identity.group(),
            consumer: self.identity.consumer(),
            streams: &positions,
            count: (self.poll_batch_size > 0).then_some(self.poll_batch_size),
            block: Some(block),
        };
        let replies = self.broker.read_group(&request)?;

        for reply in replies {
            let idx = self.cursors.index_of(&reply.stream).ok_or_else(|| {
                BrokerError::protocol(format!(
                    "read-group reply for unsubscribed stream '{}'",
                    reply.stream
                ))
            })?;
            fresh_max[idx] = reply.entries.iter().map(|e| e.id).max();

            // Own history may repeat an entry that was just reclaimed.
            let claimed: HashSet<EntryId> = per_stream[idx].iter().map(|e| e.id).collect();
            per_stream[idx].extend(reply.entries.into_iter().filter(|e| !claimed.contains(&e.id)));
        }

        // --- 3. Advance cursors, flatten in subscription order ---
        let mut messages = Vec::new();
        for (idx, entries) in per_stream.into_iter().enumerate() {
            let Some(cursor) = self.cursors.get_mut(idx) else {
                continue;
            };
            let seen_max = entries.iter().map(|e| e.id).max();
            cursor.advance(seen_max, fresh_max[idx]);
            let stream = cursor.stream().to_string();
            messages.extend(
                entries
                    .into_iter()
                    .map(|entry| (idx, Message::from_entry(&stream, entry))),
            );
        }

        self.state = if messages.is_empty() {
            PollState::NoMessages
        } else {
            PollState::NotStalled
        };
        tracing::debug!(
            consumer = %self.identity.consumer(),
            messages = messages.len(),
            "polled"
        );
        self.batch.replace(messages);
        Ok(self.state)
    }

    /// Whether `next_message` would return something without polling again.
    pub fn has_more_polled_messages(&self) -> bool {
        self.state == PollState::NotStalled && self.batch.has_more()
    }

    /// Messages of the current batch not yet handed out.
    pub fn remaining(&self) -> usize {
        self.batch.remaining()
    }

    /// Next message of the current batch; `None` once the batch is drained.
    ///
    /// Every message returned here becomes eligible for the next `ack`.
    pub fn next_message(&mut self) -> Option<&Message> {
        if self.state.is_stalled() {
            return None;
        }
        let (idx, message) = self.batch.advance()?;
        self.cursors.record_delivery(*idx, message.id);
        Some(message)
    }

    /// The message most recently returned by `next_message`.
    pub fn current(&self) -> Option<&Message> {
        self.batch.current()
    }

    /// Delivered-but-unacknowledged ids of `stream`.
    pub fn unacked(&self, stream: &str) -> &[EntryId] {
        self.cursors.by_name(stream).map_or(&[], |c| c.unacked())
    }

    pub fn unacked_total(&self) -> usize {
        self.cursors.unacked_total()
    }

    /// Drop the delivered set without acknowledging it.
    ///
    /// The entries stay in the group's pending list and can be reclaimed
    /// once idle long enough.
    pub fn forget_delivered(&mut self) -> usize {
        let dropped = self.cursors.unacked_total();
        for cursor in self.cursors.iter_mut() {
            cursor.clear_unacked();
        }
        dropped
    }

    /// Acknowledge everything delivered since the last successful ack.
    ///
    /// One broker call per stream with deliveries; streams with nothing to
    /// ack are skipped. On failure, streams acked before the failing one
    /// stay cleared and the rest keep their ids. Returns how many ids were sent.
    pub fn ack(&mut self) -> Result<usize, EngineError> {
        let mut sent = 0;
        for cursor in self.cursors.iter_mut() {
            if cursor.unacked().is_empty() {
                continue;
            }
            let acked = self
                .broker
                .ack(cursor.stream(), self.identity.group(), cursor.unacked())
                .map_err(|e| e.with_context(format!("ack on stream '{}'", cursor.stream())))?;
            tracing::debug!(
                stream = %cursor.stream(),
                consumer = %self.identity.consumer(),
                sent = cursor.unacked().len(),
                acked,
                "acknowledged"
            );
            sent += cursor.unacked().len();
            cursor.clear_unacked();
        }
        Ok(sent)
    }
}
