use std::time::Instant;

use xstream_api::broker::ReadPosition;
use xstream_api::entry::EntryId;

/// Group/consumer pair a Read Engine reads as. Fixed for the engine's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerIdentity {
    group: String,
    consumer: String,
}

impl ConsumerIdentity {
    pub fn new(group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            consumer: consumer.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

/// Per-stream read state of one consumer.
#[derive(Debug, Clone)]
pub struct StreamCursor {
    stream: String,
    position: ReadPosition,
    last_delivered: Option<EntryId>,
    /// Ids handed out through the batch since the last successful ack.
    unacked: Vec<EntryId>,
    last_claim_attempt: Option<Instant>,
}

impl StreamCursor {
    fn new(stream: String, recover_pending: bool) -> Self {
        let position = if recover_pending {
            ReadPosition::After(EntryId::MIN)
        } else {
            ReadPosition::New
        };
        Self {
            stream,
            position,
            last_delivered: None,
            unacked: Vec::new(),
            last_claim_attempt: None,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn position(&self) -> ReadPosition {
        self.position
    }

    /// Highest entry id seen for this stream, claimed or freshly read.
    pub fn last_delivered(&self) -> Option<EntryId> {
        self.last_delivered
    }

    pub fn unacked(&self) -> &[EntryId] {
        &self.unacked
    }

    pub fn last_claim_attempt(&self) -> Option<Instant> {
        self.last_claim_attempt
    }

    pub(crate) fn mark_claim_attempt(&mut self, at: Instant) {
        self.last_claim_attempt = Some(at);
    }

    /// Move the cursor past everything seen for this stream in one poll.
    ///
    /// `fresh` are the ids returned by the read-group call (not claims).
    /// While replaying own history an empty read means the history is
    /// exhausted and the cursor switches to new entries.
    pub(crate) fn advance(&mut self, seen_max: Option<EntryId>, fresh_max: Option<EntryId>) {
        if let Some(id) = seen_max {
            self.last_delivered = Some(self.last_delivered.map_or(id, |cur| cur.max(id)));
        }
        if let ReadPosition::After(after) = self.position {
            self.position = match fresh_max {
                Some(id) => ReadPosition::After(after.max(id)),
                None => ReadPosition::New,
            };
        }
    }

    pub(crate) fn record_delivery(&mut self, id: EntryId) {
        self.unacked.push(id);
    }

    pub(crate) fn clear_unacked(&mut self) {
        self.unacked.clear();
    }
}

/// Cursors of all subscribed streams, in subscription order.
#[derive(Debug, Clone)]
pub struct CursorRegistry {
    cursors: Vec<StreamCursor>,
}

impl CursorRegistry {
    pub fn new(streams: &[String], recover_pending: bool) -> Self {
        Self {
            cursors: streams
                .iter()
                .map(|s| StreamCursor::new(s.clone(), recover_pending))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn index_of(&self, stream: &str) -> Option<usize> {
        self.cursors.iter().position(|c| c.stream == stream)
    }

    pub fn get(&self, index: usize) -> Option<&StreamCursor> {
        self.cursors.get(index)
    }

    pub fn by_name(&self, stream: &str) -> Option<&StreamCursor> {
        self.cursors.iter().find(|c| c.stream == stream)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamCursor> {
        self.cursors.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut StreamCursor> {
        self.cursors.iter_mut()
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut StreamCursor> {
        self.cursors.get_mut(index)
    }

    /// `(stream, position)` pairs for one read-group call.
    pub fn read_positions(&self) -> Vec<(String, ReadPosition)> {
        self.cursors
            .iter()
            .map(|c| (c.stream.clone(), c.position))
            .collect()
    }

    pub(crate) fn record_delivery(&mut self, index: usize, id: EntryId) {
        if let Some(cursor) = self.cursors.get_mut(index) {
            cursor.record_delivery(id);
        }
    }

    /// Number of delivered entries waiting for an ack, over all streams.
    pub fn unacked_total(&self) -> usize {
        self.cursors.iter().map(|c| c.unacked.len()).sum()
    }
}
