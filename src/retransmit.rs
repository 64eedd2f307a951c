//! Retransmission timer (C4): periodic sweep of the outstanding-interest
//! table, firing a timeout callback for every entry older than its flow's
//! current RTO.

use std::collections::HashMap;

use crate::face::{Duration, Time};
use crate::wire::Name;

/// Default period between retransmission sweeps.
pub const DEFAULT_RETX_TICK: Duration = 50_000; // 50ms in microseconds

#[derive(Debug, Clone)]
struct OutstandingEntry {
    flow_key: String,
    sent_at: Time,
}

/// Every pending interest this node is waiting a reply for, keyed by its
/// own name so there is exactly one entry per outstanding interest.
#[derive(Debug, Default)]
pub struct OutstandingTable {
    entries: HashMap<Name, OutstandingEntry>,
}

impl OutstandingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: Name, flow_key: impl Into<String>, sent_at: Time) {
        self.entries.insert(
            name,
            OutstandingEntry {
                flow_key: flow_key.into(),
                sent_at,
            },
        );
    }

    pub fn remove(&mut self, name: &Name) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Remove an entry and return when it was sent, so the caller can turn
    /// the reply's arrival time into an RTT sample.
    pub fn remove_with_sent_at(&mut self, name: &Name) -> Option<Time> {
        self.entries.remove(name).map(|entry| entry.sent_at)
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names whose age exceeds `rto_of(flow_key)`, removed from the table.
    /// Each returned pair is `(name, flow_key)` so the caller can apply the
    /// flow-specific timeout decrease.
    fn sweep(&mut self, now: Time, rto_of: impl Fn(&str) -> Duration) -> Vec<(Name, String)> {
        let expired: Vec<Name> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_sub(entry.sent_at) > rto_of(&entry.flow_key))
            .map(|(name, _)| name.clone())
            .collect();

        expired
            .into_iter()
            .map(|name| {
                let entry = self.entries.remove(&name).expect("just observed in sweep");
                (name, entry.flow_key)
            })
            .collect()
    }
}

/// Drives the periodic sweep; the host simulator owns the actual timer
/// event and calls [`RetransmissionTimer::fire`] when it expires.
#[derive(Debug, Clone, Copy)]
pub struct RetransmissionTimer {
    pub tick: Duration,
}

impl RetransmissionTimer {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }

    /// Run one sweep over `table`, returning the interests that timed out
    /// (already removed from the table).
    pub fn fire(
        &self,
        table: &mut OutstandingTable,
        now: Time,
        rto_of: impl Fn(&str) -> Duration,
    ) -> Vec<(Name, String)> {
        table.sweep(now, rto_of)
    }
}

impl Default for RetransmissionTimer {
    fn default() -> Self {
        Self::new(DEFAULT_RETX_TICK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::InterestKind;

    fn name(seq: u64) -> Name {
        Name::sub_interest("agg0", &["p0".to_owned()], InterestKind::Data, seq)
    }

    #[test]
    fn entries_younger_than_rto_survive_a_sweep() {
        let mut table = OutstandingTable::new();
        table.insert(name(1), "round0", 1_000);

        let timer = RetransmissionTimer::new(50_000);
        let expired = timer.fire(&mut table, 1_500, |_| 10_000);
        assert!(expired.is_empty());
        assert!(table.contains(&name(1)));
    }

    #[test]
    fn entries_older_than_rto_are_removed_and_returned() {
        let mut table = OutstandingTable::new();
        table.insert(name(1), "round0", 1_000);
        table.insert(name(2), "round0", 1_000);

        let timer = RetransmissionTimer::new(50_000);
        let mut expired = timer.fire(&mut table, 20_000, |_| 5_000);
        expired.sort_by_key(|(n, _)| n.sequence());

        assert_eq!(expired.len(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn remove_with_sent_at_returns_the_original_send_time() {
        let mut table = OutstandingTable::new();
        table.insert(name(1), "round0", 1_234);
        assert_eq!(table.remove_with_sent_at(&name(1)), Some(1_234));
        assert!(table.is_empty());
        assert_eq!(table.remove_with_sent_at(&name(1)), None);
    }

    #[test]
    fn each_outstanding_interest_has_exactly_one_entry() {
        let mut table = OutstandingTable::new();
        table.insert(name(1), "round0", 0);
        table.insert(name(1), "round0", 5); // resend overwrites, not duplicates
        assert_eq!(table.len(), 1);
    }
}
