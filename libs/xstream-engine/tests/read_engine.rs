use std::time::Duration;

use xstream_api::broker::{
    GroupCreation, GroupStart, PendingRecord, ReadGroupRequest, StreamBroker,
};
use xstream_api::entry::{Entry, EntryId, Fields, StreamEntries};
use xstream_api::error::{BrokerError, ErrorKind};
use xstream_broker_memory::{MemoryBroker, Operation};
use xstream_engine::claim::{ClaimOptions, ClaimOutcome, ClaimResolver};
use xstream_engine::cursor::ConsumerIdentity;
use xstream_engine::error::EngineError;
use xstream_engine::reader::{PollState, ReaderOptions, StreamReader};

fn fields(v: &str) -> Fields {
    [("data", v)].into_iter().collect()
}

fn options() -> ReaderOptions {
    ReaderOptions {
        poll_timeout: Duration::from_millis(10),
        ..ReaderOptions::default()
    }
}

fn claiming(batch_size: usize, min_idle: Duration) -> ReaderOptions {
    ReaderOptions {
        claim: ClaimOptions {
            batch_size,
            min_idle,
            check_interval: Duration::ZERO,
        },
        ..options()
    }
}

fn reader(broker: &MemoryBroker, consumer: &str, streams: &[&str], options: ReaderOptions) -> StreamReader {
    let names: Vec<String> = streams.iter().map(|s| s.to_string()).collect();
    StreamReader::new(
        Box::new(broker.clone()),
        ConsumerIdentity::new("g", consumer),
        &names,
        options,
    )
}

fn setup(streams: &[&str]) -> MemoryBroker {
    let mut broker = MemoryBroker::new();
    for s in streams {
        broker.create_group(s, "g", &GroupStart::Latest).unwrap();
    }
    broker
}

fn drain(reader: &mut StreamReader) -> Vec<(String, EntryId)> {
    let mut out = Vec::new();
    while let Some(m) = reader.next_message() {
        out.push((m.stream.clone(), m.id));
    }
    out
}

#[test]
fn poll_without_data_reports_no_messages() {
    let broker = setup(&["s"]);
    let mut r = reader(&broker, "c", &["s"], options());

    assert_eq!(r.state(), PollState::NoMessages);
    assert_eq!(r.poll().unwrap(), PollState::NoMessages);
    assert!(r.is_stalled());
    assert!(!r.has_more_polled_messages());
    assert!(r.next_message().is_none());
}

#[test]
fn ack_clears_exactly_the_delivered_set() {
    let mut broker = setup(&["s"]);
    for v in ["1", "2", "3"] {
        broker.append("s", &fields(v)).unwrap();
    }
    let mut r = reader(&broker, "c", &["s"], options());

    assert_eq!(r.poll().unwrap(), PollState::NotStalled);
    assert!(r.has_more_polled_messages());
    let first = r.next_message().unwrap().id;
    let second = r.next_message().unwrap().id;
    assert_eq!(r.unacked("s"), &[first, second]);
    assert_eq!(r.current().map(|m| m.id), Some(second));

    assert_eq!(r.ack().unwrap(), 2);
    assert_eq!(r.unacked_total(), 0);

    // The third entry was polled but never handed out: still pending.
    let pending = broker.pending("s", "g");
    assert_eq!(pending.len(), 1);
    assert!(pending[0].id > second);
    assert!(r.has_more_polled_messages());
}

#[test]
fn second_ack_without_deliveries_sends_nothing() {
    let mut broker = setup(&["s"]);
    broker.append("s", &fields("1")).unwrap();
    let mut r = reader(&broker, "c", &["s"], options());
    r.poll().unwrap();
    drain(&mut r);
    assert_eq!(r.ack().unwrap(), 1);

    // Any broker call would hit the injected failure.
    broker.fail_next(Operation::Ack);
    assert_eq!(r.ack().unwrap(), 0);
}

#[test]
fn streams_are_concatenated_in_subscription_order() {
    let mut broker = setup(&["A", "B"]);
    // B's entry arrives first on the wall clock.
    let b1 = broker.append("B", &fields("b1")).unwrap();
    let a1 = broker.append("A", &fields("a1")).unwrap();
    let a2 = broker.append("A", &fields("a2")).unwrap();

    let mut r = reader(&broker, "c", &["A", "B"], options());
    r.poll().unwrap();
    assert_eq!(
        drain(&mut r),
        vec![("A".to_string(), a1), ("A".to_string(), a2), ("B".to_string(), b1)]
    );
    assert_eq!(r.cursors().by_name("A").unwrap().last_delivered(), Some(a2));
    assert_eq!(r.cursors().by_name("B").unwrap().last_delivered(), Some(b1));
}

#[test]
fn poll_batch_size_bounds_each_stream() {
    let mut broker = setup(&["s"]);
    for v in ["1", "2", "3"] {
        broker.append("s", &fields(v)).unwrap();
    }
    let mut r = reader(
        &broker,
        "c",
        &["s"],
        ReaderOptions {
            poll_batch_size: 2,
            ..options()
        },
    );
    r.poll().unwrap();
    assert_eq!(r.remaining(), 2);
    drain(&mut r);
    r.poll().unwrap();
    assert_eq!(r.remaining(), 1);
}

#[test]
fn claim_respects_threshold_and_batch_size() {
    let mut broker = setup(&["s"]);
    for v in ["1", "2", "3"] {
        broker.append("s", &fields(v)).unwrap();
    }
    let mut dead = reader(&broker, "dead", &["s"], options());
    dead.poll().unwrap();
    let delivered = drain(&mut dead);

    let mut alive = reader(&broker, "alive", &["s"], claiming(2, Duration::from_secs(10)));

    broker.advance_clock(Duration::from_secs(5));
    assert_eq!(alive.poll().unwrap(), PollState::NoMessages);

    broker.advance_clock(Duration::from_secs(6));
    assert_eq!(alive.poll().unwrap(), PollState::NotStalled);
    let claimed = drain(&mut alive);
    assert_eq!(
        claimed.iter().map(|(_, id)| *id).collect::<Vec<_>>(),
        vec![delivered[0].1, delivered[1].1]
    );

    let owners: Vec<_> = broker.pending("s", "g").into_iter().map(|p| p.consumer).collect();
    assert_eq!(owners, vec!["alive", "alive", "dead"]);
}

#[test]
fn reclaimed_entries_precede_fresh_ones() {
    let mut broker = setup(&["s"]);
    broker.append("s", &fields("old")).unwrap();
    let mut dead = reader(&broker, "dead", &["s"], options());
    dead.poll().unwrap();
    drain(&mut dead);

    broker.advance_clock(Duration::from_secs(60));
    let fresh = broker.append("s", &fields("new")).unwrap();

    let mut alive = reader(&broker, "alive", &["s"], claiming(10, Duration::from_secs(30)));
    alive.poll().unwrap();
    let got = drain(&mut alive);
    assert_eq!(got.len(), 2);
    assert!(got[0].1 < fresh);
    assert_eq!(got[1].1, fresh);

    alive.ack().unwrap();
    assert!(broker.pending("s", "g").is_empty());
}

#[test]
fn entry_claimed_by_one_consumer_is_not_claimed_again() {
    let mut broker = setup(&["s"]);
    broker.append("s", &fields("1")).unwrap();
    let mut dead = reader(&broker, "dead", &["s"], options());
    dead.poll().unwrap();
    drain(&mut dead);
    broker.advance_clock(Duration::from_secs(2));

    // Y lists the entry, then X claims it first.
    let mut y_conn = broker.clone();
    let listed: Vec<EntryId> = y_conn
        .list_pending("s", "g", 1000, 10)
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(listed.len(), 1);

    let mut x = reader(&broker, "x", &["s"], claiming(10, Duration::from_secs(1)));
    x.poll().unwrap();
    assert_eq!(drain(&mut x).len(), 1);

    assert!(y_conn.claim("s", "g", "y", 1000, &listed).unwrap().is_empty());

    let mut y = reader(&broker, "y", &["s"], claiming(10, Duration::from_secs(1)));
    assert_eq!(y.poll().unwrap(), PollState::NoMessages);
    assert_eq!(broker.pending("s", "g")[0].consumer, "x");
}

/// Acks the first listed entry between listing and claiming.
struct AckingBetween {
    inner: MemoryBroker,
}

impl StreamBroker for AckingBetween {
    fn create_group(&mut self, stream: &str, group: &str, start: &GroupStart) -> Result<GroupCreation, BrokerError> {
        self.inner.create_group(stream, group, start)
    }

    fn destroy_group(&mut self, stream: &str, group: &str) -> Result<bool, BrokerError> {
        self.inner.destroy_group(stream, group)
    }

    fn read_group(&mut self, request: &ReadGroupRequest<'_>) -> Result<Vec<StreamEntries>, BrokerError> {
        self.inner.read_group(request)
    }

    fn list_pending(
        &mut self,
        stream: &str,
        group: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<PendingRecord>, BrokerError> {
        let listed = self.inner.list_pending(stream, group, min_idle_ms, count)?;
        if let Some(first) = listed.first() {
            self.inner.ack(stream, group, &[first.id])?;
        }
        Ok(listed)
    }

    fn claim(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[EntryId],
    ) -> Result<Vec<Entry>, BrokerError> {
        self.inner.claim(stream, group, consumer, min_idle_ms, ids)
    }

    fn ack(&mut self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, BrokerError> {
        self.inner.ack(stream, group, ids)
    }

    fn append(&mut self, stream: &str, fields: &Fields) -> Result<EntryId, BrokerError> {
        self.inner.append(stream, fields)
    }
}

#[test]
fn vanished_pending_entry_is_reported_not_found() {
    let mut broker = setup(&["s"]);
    broker.append("s", &fields("1")).unwrap();
    broker.append("s", &fields("2")).unwrap();
    let mut dead = reader(&broker, "dead", &["s"], options());
    dead.poll().unwrap();
    let delivered = drain(&mut dead);
    broker.advance_clock(Duration::from_secs(2));

    let resolver = ClaimResolver::new(ClaimOptions {
        batch_size: 10,
        min_idle: Duration::from_secs(1),
        check_interval: Duration::ZERO,
    });
    let mut racing = AckingBetween { inner: broker.clone() };
    let report = resolver
        .reclaim(&mut racing, &ConsumerIdentity::new("g", "alive"), "s")
        .unwrap();

    assert_eq!(report.not_found(), 1);
    assert_eq!(report.outcomes[0], ClaimOutcome::NotFound(delivered[0].1));
    assert_eq!(report.claimed().map(|e| e.id).collect::<Vec<_>>(), vec![delivered[1].1]);
}

#[test]
fn recover_pending_replays_own_history_then_reads_new() {
    let mut broker = setup(&["s"]);
    broker.append("s", &fields("1")).unwrap();
    broker.append("s", &fields("2")).unwrap();
    let mut before_crash = reader(&broker, "c", &["s"], options());
    before_crash.poll().unwrap();
    let delivered = drain(&mut before_crash);
    drop(before_crash);

    let mut restarted = reader(
        &broker,
        "c",
        &["s"],
        ReaderOptions {
            recover_pending: true,
            ..options()
        },
    );
    restarted.poll().unwrap();
    assert_eq!(drain(&mut restarted), delivered);
    restarted.ack().unwrap();

    // History exhausted: the cursor moves on to new entries.
    assert_eq!(restarted.poll().unwrap(), PollState::NoMessages);
    let fresh = broker.append("s", &fields("3")).unwrap();
    restarted.poll().unwrap();
    assert_eq!(drain(&mut restarted), vec![("s".to_string(), fresh)]);
}

#[test]
fn transport_failure_is_an_error_not_an_empty_poll() {
    let broker = setup(&["s"]);
    let mut r = reader(&broker, "c", &["s"], options());
    broker.fail_next(Operation::ReadGroup);
    match r.poll() {
        Err(EngineError::Broker(e)) => assert_eq!(e.kind(), ErrorKind::Transport),
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[test]
fn missing_group_is_a_config_error() {
    let mut broker = MemoryBroker::new();
    broker.append("s", &fields("1")).unwrap();
    let mut r = reader(&broker, "c", &["s"], options());
    match r.poll() {
        Err(EngineError::Broker(e)) => assert_eq!(e.kind(), ErrorKind::Config),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn failed_ack_keeps_ids_for_retry() {
    let mut broker = setup(&["A", "B"]);
    broker.append("A", &fields("a")).unwrap();
    broker.append("B", &fields("b")).unwrap();
    let mut r = reader(&broker, "c", &["A", "B"], options());
    r.poll().unwrap();
    drain(&mut r);

    broker.fail_next(Operation::Ack);
    assert!(r.ack().is_err());
    assert_eq!(r.unacked_total(), 2);

    assert_eq!(r.ack().unwrap(), 2);
    assert!(broker.pending("A", "g").is_empty());
    assert!(broker.pending("B", "g").is_empty());
}

#[test]
fn forgotten_deliveries_stay_pending() {
    let mut broker = setup(&["s"]);
    broker.append("s", &fields("1")).unwrap();
    let mut r = reader(&broker, "c", &["s"], options());
    r.poll().unwrap();
    drain(&mut r);

    assert_eq!(r.forget_delivered(), 1);
    assert_eq!(r.ack().unwrap(), 0);
    assert_eq!(broker.pending("s", "g").len(), 1);
}
