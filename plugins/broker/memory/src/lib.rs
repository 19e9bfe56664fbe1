use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use xstream_api::broker::{
    BrokerConnector, GroupCreation, GroupStart, PendingRecord, ReadGroupRequest, ReadPosition,
    StreamBroker,
};
use xstream_api::entry::{Entry, EntryId, Fields, StreamEntries};
use xstream_api::error::BrokerError;

// ═══════════════════════════════════════════════════════════════
//  State
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct PendingEntry {
    consumer: String,
    /// Clock millis of the last delivery.
    delivery_time: u64,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct Group {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
}

#[derive(Debug, Default)]
struct MemStream {
    entries: BTreeMap<EntryId, Fields>,
    last_id: EntryId,
    groups: HashMap<String, Group>,
}

impl MemStream {
    fn next_id(&self, now_ms: u64) -> EntryId {
        if now_ms > self.last_id.ms {
            EntryId::new(now_ms, 0)
        } else {
            EntryId::new(self.last_id.ms, self.last_id.seq + 1)
        }
    }

    fn entry(&self, id: EntryId) -> Option<Entry> {
        self.entries.get(&id).map(|fields| Entry {
            id,
            fields: fields.clone(),
        })
    }
}

/// Broker operation, for one-shot failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateGroup,
    ReadGroup,
    ListPending,
    Claim,
    Ack,
    Append,
}

#[derive(Debug, Default)]
struct State {
    streams: HashMap<String, MemStream>,
    failures: Vec<Operation>,
}

impl State {
    fn take_failure(&mut self, op: Operation) -> Result<(), BrokerError> {
        match self.failures.iter().position(|f| *f == op) {
            Some(i) => {
                self.failures.remove(i);
                Err(BrokerError::transport(format!("injected {op:?} failure")))
            }
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    appended: Condvar,
    clock_skew_ms: AtomicU64,
    connections: AtomicUsize,
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

/// In-process broker with consumer-group semantics: pending entry lists,
/// idle times, claims and blocking reads.
///
/// Clones share the same data; each clone acts as one connection.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the broker clock forward, ageing every pending entry.
    pub fn advance_clock(&self, by: Duration) {
        self.shared
            .clock_skew_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the next call of `op` (through any clone) fail with a transport error.
    pub fn fail_next(&self, op: Operation) {
        self.lock().failures.push(op);
    }

    /// Connections handed out by `BrokerConnector::connect`.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Number of entries in `stream`.
    pub fn len(&self, stream: &str) -> usize {
        self.lock().streams.get(stream).map_or(0, |s| s.entries.len())
    }

    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    /// All entries of `stream` in id order.
    pub fn entries(&self, stream: &str) -> Vec<Entry> {
        self.lock().streams.get(stream).map_or_else(Vec::new, |s| {
            s.entries
                .iter()
                .map(|(id, fields)| Entry {
                    id: *id,
                    fields: fields.clone(),
                })
                .collect()
        })
    }

    pub fn has_group(&self, stream: &str, group: &str) -> bool {
        self.lock()
            .streams
            .get(stream)
            .is_some_and(|s| s.groups.contains_key(group))
    }

    /// Pending entries of `group` on `stream`, regardless of idle time.
    pub fn pending(&self, stream: &str, group: &str) -> Vec<PendingRecord> {
        let now = self.now_ms();
        self.lock()
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or_else(Vec::new, |g| pending_records(stream, g, now, 0, usize::MAX))
    }

    fn now_ms(&self) -> u64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        wall + self.shared.clock_skew_ms.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// One non-blocking pass over the requested streams.
    ///
    /// Returns the reply and whether any stream was read from history
    /// (history reads never block).
    fn read_once(
        &self,
        state: &mut State,
        request: &ReadGroupRequest<'_>,
    ) -> Result<(Vec<StreamEntries>, bool), BrokerError> {
        let now = self.now_ms();
        let count = request.count.unwrap_or(usize::MAX);
        let mut reply = Vec::new();
        let mut history = false;

        for (stream, position) in request.streams {
            let s = state
                .streams
                .get_mut(stream.as_str())
                .ok_or_else(|| BrokerError::no_group(stream, request.group))?;
            let group = s
                .groups
                .get_mut(request.group)
                .ok_or_else(|| BrokerError::no_group(stream, request.group))?;

            let entries: Vec<Entry> = match position {
                ReadPosition::New => {
                    let ids: Vec<EntryId> = s
                        .entries
                        .range(group.last_delivered..)
                        .map(|(id, _)| *id)
                        .filter(|id| *id > group.last_delivered)
                        .take(count)
                        .collect();
                    for id in &ids {
                        group.pending.insert(
                            *id,
                            PendingEntry {
                                consumer: request.consumer.to_string(),
                                delivery_time: now,
                                delivery_count: 1,
                            },
                        );
                    }
                    if let Some(last) = ids.last() {
                        group.last_delivered = *last;
                    }
                    ids.into_iter().filter_map(|id| s.entry(id)).collect()
                }
                ReadPosition::After(after) => {
                    history = true;
                    let ids: Vec<EntryId> = group
                        .pending
                        .iter()
                        .filter(|(id, pe)| **id > *after && pe.consumer == request.consumer)
                        .map(|(id, _)| *id)
                        .take(count)
                        .collect();
                    ids.into_iter().filter_map(|id| s.entry(id)).collect()
                }
            };

            if !entries.is_empty() || matches!(position, ReadPosition::After(_)) {
                reply.push(StreamEntries {
                    stream: stream.clone(),
                    entries,
                });
            }
        }

        let has_data = reply.iter().any(|r| !r.entries.is_empty());
        Ok((if has_data || history { reply } else { Vec::new() }, history))
    }
}

fn pending_records(
    stream: &str,
    group: &Group,
    now: u64,
    min_idle_ms: u64,
    count: usize,
) -> Vec<PendingRecord> {
    group
        .pending
        .iter()
        .map(|(id, pe)| PendingRecord {
            stream: stream.to_string(),
            id: *id,
            consumer: pe.consumer.clone(),
            idle_ms: now.saturating_sub(pe.delivery_time),
            delivery_count: pe.delivery_count,
        })
        .filter(|p| p.idle_ms >= min_idle_ms)
        .take(count)
        .collect()
}

impl StreamBroker for MemoryBroker {
    fn create_group(
        &mut self,
        stream: &str,
        group: &str,
        start: &GroupStart,
    ) -> Result<GroupCreation, BrokerError> {
        let mut state = self.lock();
        state.take_failure(Operation::CreateGroup)?;
        let s = state.streams.entry(stream.to_string()).or_default();
        if s.groups.contains_key(group) {
            return Ok(GroupCreation::AlreadyExists);
        }
        let last_delivered = match start {
            GroupStart::Latest => s.last_id,
            GroupStart::Beginning => EntryId::MIN,
            GroupStart::At(id) => *id,
        };
        s.groups.insert(
            group.to_string(),
            Group {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        tracing::debug!(%stream, %group, %start, "memory broker: group created");
        Ok(GroupCreation::Created)
    }

    fn destroy_group(&mut self, stream: &str, group: &str) -> Result<bool, BrokerError> {
        Ok(self
            .lock()
            .streams
            .get_mut(stream)
            .is_some_and(|s| s.groups.remove(group).is_some()))
    }

    fn read_group(&mut self, request: &ReadGroupRequest<'_>) -> Result<Vec<StreamEntries>, BrokerError> {
        let deadline = match request.block {
            Some(d) if !d.is_zero() => Some(Instant::now() + d),
            _ => None,
        };

        let mut state = self.lock();
        state.take_failure(Operation::ReadGroup)?;
        loop {
            let (reply, history) = self.read_once(&mut state, request)?;
            if !reply.is_empty() || history {
                return Ok(reply);
            }
            state = match (request.block, deadline) {
                (None, _) => return Ok(reply),
                (Some(_), None) => self
                    .shared
                    .appended
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                (Some(_), Some(deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(reply);
                    }
                    self.shared
                        .appended
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    fn list_pending(
        &mut self,
        stream: &str,
        group: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<PendingRecord>, BrokerError> {
        let now = self.now_ms();
        let mut state = self.lock();
        state.take_failure(Operation::ListPending)?;
        let g = state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| BrokerError::no_group(stream, group))?;
        Ok(pending_records(stream, g, now, min_idle_ms, count))
    }

    fn claim(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[EntryId],
    ) -> Result<Vec<Entry>, BrokerError> {
        let now = self.now_ms();
        let mut state = self.lock();
        state.take_failure(Operation::Claim)?;
        let s = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::no_group(stream, group))?;
        let g = s
            .groups
            .get_mut(group)
            .ok_or_else(|| BrokerError::no_group(stream, group))?;

        let mut claimed = Vec::new();
        for id in ids {
            let Some(pe) = g.pending.get_mut(id) else {
                continue;
            };
            if now.saturating_sub(pe.delivery_time) < min_idle_ms {
                continue;
            }
            match s.entries.get(id) {
                Some(fields) => {
                    pe.consumer = consumer.to_string();
                    pe.delivery_time = now;
                    pe.delivery_count += 1;
                    claimed.push(Entry {
                        id: *id,
                        fields: fields.clone(),
                    });
                }
                // Entry deleted from the stream: drop it from the PEL.
                None => {
                    g.pending.remove(id);
                }
            }
        }
        Ok(claimed)
    }

    fn ack(&mut self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, BrokerError> {
        let mut state = self.lock();
        state.take_failure(Operation::Ack)?;
        let Some(g) = state.streams.get_mut(stream).and_then(|s| s.groups.get_mut(group)) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| g.pending.remove(*id).is_some()).count() as u64)
    }

    fn append(&mut self, stream: &str, fields: &Fields) -> Result<EntryId, BrokerError> {
        if fields.is_empty() {
            return Err(BrokerError::format("entry must have at least one field"));
        }
        let now = self.now_ms();
        let mut state = self.lock();
        state.take_failure(Operation::Append)?;
        let s = state.streams.entry(stream.to_string()).or_default();
        let id = s.next_id(now);
        s.entries.insert(id, fields.clone());
        s.last_id = id;
        drop(state);
        self.shared.appended.notify_all();
        Ok(id)
    }
}

impl BrokerConnector for MemoryBroker {
    fn connect(&self) -> Result<Box<dyn StreamBroker>, BrokerError> {
        self.shared.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.clone()))
    }
}
