use std::fmt;
use std::time::Duration;

use crate::entry::{Entry, EntryId, Fields, StreamEntries};
use crate::error::BrokerError;

/// Where a read-group request starts for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPosition {
    /// Only entries never delivered to any consumer of the group (`>`).
    New,
    /// This consumer's own pending history after the given id.
    After(EntryId),
}

impl fmt::Display for ReadPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadPosition::New => f.write_str(">"),
            ReadPosition::After(id) => write!(f, "{id}"),
        }
    }
}

/// Start position of a newly created consumer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// Only entries appended after creation (`$`).
    Latest,
    /// Whole stream history (`0`).
    Beginning,
    /// Entries after the given id.
    At(EntryId),
}

impl GroupStart {
    pub fn parse(s: &str) -> Result<Self, BrokerError> {
        match s.trim() {
            "$" => Ok(GroupStart::Latest),
            "0" | "0-0" => Ok(GroupStart::Beginning),
            other => EntryId::parse(other)
                .map(GroupStart::At)
                .map_err(|e| BrokerError::config(format!("invalid group start id: {}", e.message))),
        }
    }
}

impl fmt::Display for GroupStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupStart::Latest => f.write_str("$"),
            GroupStart::Beginning => f.write_str("0"),
            GroupStart::At(id) => write!(f, "{id}"),
        }
    }
}

/// Outcome of a create-group call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCreation {
    Created,
    AlreadyExists,
}

/// Broker metadata about a delivered-but-unacknowledged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub stream: String,
    pub id: EntryId,
    /// Consumer currently owning the entry.
    pub consumer: String,
    /// Milliseconds since the entry was last delivered to its owner.
    pub idle_ms: u64,
    pub delivery_count: u64,
}

/// Parameters of one read-group call covering several streams.
#[derive(Debug, Clone)]
pub struct ReadGroupRequest<'a> {
    pub group: &'a str,
    pub consumer: &'a str,
    /// Streams in subscription order with their read positions.
    pub streams: &'a [(String, ReadPosition)],
    /// Max entries per stream; `None` is unbounded.
    pub count: Option<usize>,
    /// `None` returns immediately, `Some(ZERO)` blocks until data arrives.
    pub block: Option<Duration>,
}

/// Synchronous broker client. One instance owns one connection.
///
/// The engine never retries: every error is returned to the caller as-is.
pub trait StreamBroker: Send {
    /// Create `group` on `stream`, creating the stream if it is missing.
    fn create_group(
        &mut self,
        stream: &str,
        group: &str,
        start: &GroupStart,
    ) -> Result<GroupCreation, BrokerError>;

    /// Destroy `group` on `stream`. Returns whether a group was removed.
    fn destroy_group(&mut self, stream: &str, group: &str) -> Result<bool, BrokerError>;

    /// Read entries as a group member. Streams without data may be omitted
    /// from the reply; an empty reply means the block time elapsed.
    fn read_group(&mut self, request: &ReadGroupRequest<'_>) -> Result<Vec<StreamEntries>, BrokerError>;

    /// Pending entries of the group idle for at least `min_idle_ms`, oldest first.
    fn list_pending(
        &mut self,
        stream: &str,
        group: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<PendingRecord>, BrokerError>;

    /// Reassign ownership of `ids` to `consumer` and return their content.
    ///
    /// Entries that are no longer pending, or were delivered less than
    /// `min_idle_ms` ago, are left untouched and absent from the result.
    fn claim(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[EntryId],
    ) -> Result<Vec<Entry>, BrokerError>;

    /// Acknowledge `ids`. Returns how many were pending.
    fn ack(&mut self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, BrokerError>;

    /// Append one entry to `stream`.
    fn append(&mut self, stream: &str, fields: &Fields) -> Result<EntryId, BrokerError>;
}

/// Factory of broker connections: one fresh connection per engine instance.
pub trait BrokerConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn StreamBroker>, BrokerError>;
}
