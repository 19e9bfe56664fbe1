use std::time::{Duration, Instant};

use xstream_api::broker::{PendingRecord, StreamBroker};
use xstream_api::entry::{Entry, EntryId};
use xstream_api::error::BrokerError;

use crate::cursor::{ConsumerIdentity, StreamCursor};

/// Reclaim tuning, taken from the table settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOptions {
    /// Max entries reclaimed per stream per poll. 0 disables reclaiming.
    pub batch_size: usize,
    /// Pending entries idle for less than this stay with their owner.
    pub min_idle: Duration,
    /// Minimum spacing between two reclaim attempts on the same stream.
    pub check_interval: Duration,
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self {
            batch_size: 0,
            min_idle: Duration::from_millis(10_000),
            check_interval: Duration::ZERO,
        }
    }
}

/// Result of trying to claim one listed pending entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(Entry),
    /// Acked or claimed by someone else between listing and claiming.
    NotFound(EntryId),
}

/// Everything one reclaim attempt on a stream produced.
#[derive(Debug, Clone, Default)]
pub struct ClaimReport {
    pub outcomes: Vec<ClaimOutcome>,
}

impl ClaimReport {
    pub fn claimed(&self) -> impl Iterator<Item = &Entry> {
        self.outcomes.iter().filter_map(|o| match o {
            ClaimOutcome::Claimed(entry) => Some(entry),
            ClaimOutcome::NotFound(_) => None,
        })
    }

    pub fn not_found(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ClaimOutcome::NotFound(_)))
            .count()
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.outcomes
            .into_iter()
            .filter_map(|o| match o {
                ClaimOutcome::Claimed(entry) => Some(entry),
                ClaimOutcome::NotFound(_) => None,
            })
            .collect()
    }
}

/// Takes over pending entries whose owner looks dead or stuck.
#[derive(Debug, Clone, Default)]
pub struct ClaimResolver {
    options: ClaimOptions,
}

impl ClaimResolver {
    pub fn new(options: ClaimOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ClaimOptions {
        &self.options
    }

    /// Whether a reclaim attempt should precede this poll's read on `cursor`'s stream.
    pub fn is_due(&self, cursor: &StreamCursor, now: Instant) -> bool {
        if self.options.batch_size == 0 {
            return false;
        }
        match cursor.last_claim_attempt() {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.options.check_interval,
        }
    }

    /// Entries idle for at least `min_idle`, oldest first, at most `batch_size`.
    pub fn eligible(&self, mut pending: Vec<PendingRecord>) -> Vec<PendingRecord> {
        let min_idle_ms = self.min_idle_ms();
        pending.retain(|p| p.idle_ms >= min_idle_ms);
        pending.sort_by_key(|p| p.id);
        pending.truncate(self.options.batch_size);
        pending
    }

    /// List stale pending entries of `stream` and claim them for `identity`.
    ///
    /// Listing and claiming are two calls; the claim re-checks idle time on the
    /// broker, so an entry acked or taken over in between shows up as
    /// `ClaimOutcome::NotFound` instead of being delivered twice.
    pub fn reclaim(
        &self,
        broker: &mut dyn StreamBroker,
        identity: &ConsumerIdentity,
        stream: &str,
    ) -> Result<ClaimReport, BrokerError> {
        if self.options.batch_size == 0 {
            return Ok(ClaimReport::default());
        }

        let min_idle_ms = self.min_idle_ms();
        let pending = broker.list_pending(
            stream,
            identity.group(),
            min_idle_ms,
            self.options.batch_size,
        )?;
        let candidates = self.eligible(pending);
        if candidates.is_empty() {
            return Ok(ClaimReport::default());
        }

        let ids: Vec<EntryId> = candidates.iter().map(|p| p.id).collect();
        let mut claimed = broker.claim(
            stream,
            identity.group(),
            identity.consumer(),
            min_idle_ms,
            &ids,
        )?;

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            match claimed.iter().position(|e| e.id == id) {
                Some(pos) => outcomes.push(ClaimOutcome::Claimed(claimed.swap_remove(pos))),
                None => {
                    tracing::debug!(
                        %stream,
                        consumer = %identity.consumer(),
                        entry = %id,
                        "pending entry vanished before claim"
                    );
                    outcomes.push(ClaimOutcome::NotFound(id));
                }
            }
        }

        let report = ClaimReport { outcomes };
        tracing::debug!(
            %stream,
            consumer = %identity.consumer(),
            claimed = report.claimed().count(),
            not_found = report.not_found(),
            "reclaimed pending entries"
        );
        Ok(report)
    }

    fn min_idle_ms(&self) -> u64 {
        self.options.min_idle.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::CursorRegistry;

    fn record(id: u64, idle_ms: u64) -> PendingRecord {
        PendingRecord {
            stream: "s".into(),
            id: EntryId::new(id, 0),
            consumer: "dead".into(),
            idle_ms,
            delivery_count: 1,
        }
    }

    fn resolver(batch_size: usize, min_idle_ms: u64) -> ClaimResolver {
        ClaimResolver::new(ClaimOptions {
            batch_size,
            min_idle: Duration::from_millis(min_idle_ms),
            check_interval: Duration::from_secs(60),
        })
    }

    #[test]
    fn below_threshold_is_never_eligible() {
        let r = resolver(10, 1000);
        let eligible = r.eligible(vec![record(1, 999), record(2, 1000), record(3, 5000)]);
        let ids: Vec<_> = eligible.iter().map(|p| p.id.ms).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn eligible_is_bounded_by_batch_size_oldest_first() {
        let r = resolver(2, 0);
        let eligible = r.eligible(vec![record(9, 1), record(4, 1), record(6, 1)]);
        let ids: Vec<_> = eligible.iter().map(|p| p.id.ms).collect();
        assert_eq!(ids, vec![4, 6]);
    }

    #[test]
    fn due_respects_batch_size_and_interval() {
        let registry = CursorRegistry::new(&["s".to_string()], false);
        let now = Instant::now();

        assert!(!resolver(0, 0).is_due(registry.get(0).unwrap(), now));
        assert!(resolver(1, 0).is_due(registry.get(0).unwrap(), now));

        let mut cursor = registry.get(0).unwrap().clone();
        cursor.mark_claim_attempt(now);
        assert!(!resolver(1, 0).is_due(&cursor, now + Duration::from_secs(1)));
        assert!(resolver(1, 0).is_due(&cursor, now + Duration::from_secs(60)));
    }

    #[test]
    fn report_splits_outcomes() {
        let entry = Entry {
            id: EntryId::new(1, 0),
            fields: Default::default(),
        };
        let report = ClaimReport {
            outcomes: vec![
                ClaimOutcome::Claimed(entry.clone()),
                ClaimOutcome::NotFound(EntryId::new(2, 0)),
            ],
        };
        assert_eq!(report.claimed().count(), 1);
        assert_eq!(report.not_found(), 1);
        assert_eq!(report.into_entries(), vec![entry]);
    }
}
