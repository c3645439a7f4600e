//! Delayed-visibility tracking of aborted transactions.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::queue::DeleteEfficientQueue;
use crate::timestamp::Timestamp;

/// A start or full-abort event held in the pending queue.
///
/// Two markers are equal iff both kind and timestamp match, so a `Started`
/// and a `FullAborted` marker carrying the same timestamp denote distinct
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// A transaction with this start timestamp is outstanding.
    Started(Timestamp),
    /// This start timestamp is fully aborted and may be forgotten.
    FullAborted(Timestamp),
}

/// The set of aborted transactions shared by concurrent transactions.
///
/// If transaction Ta is in the aborted set when transaction Tr starts, it
/// must stay there until Tr finishes. Otherwise Tr could read a value
/// written by Ta and, no longer finding Ta in the set, take it as committed.
/// Removal of an abort is therefore delayed until every transaction that was
/// outstanding at the time of the removal request has finished: the request
/// is queued behind those transactions' start markers and applied only once
/// it reaches the head of the queue.
///
/// All operations are mutually exclusive under a single lock and run in
/// amortized constant time, except the trailing flush in
/// [`SharedAbortedSet::transaction_finished`], which is bounded by the number
/// of full-abort requests accumulated behind completed transactions.
#[derive(Debug)]
pub struct SharedAbortedSet {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    aborted: HashSet<Timestamp>,
    pending: DeleteEfficientQueue<Marker>,
}

impl SharedAbortedSet {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Is `ts` currently to be treated as aborted?
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.inner.lock().aborted.contains(&ts)
    }

    /// Mark `ts` as aborted. Idempotent.
    pub fn add(&self, ts: Timestamp) {
        self.inner.lock().aborted.insert(ts);
    }

    /// Request cleanup of a previously-aborted `ts` whose effects have been
    /// fully reconciled. Applied immediately if no transaction is
    /// outstanding, otherwise deferred behind their start markers.
    pub fn remove(&self, ts: Timestamp) {
        let mut inner = self.inner.lock();
        if inner.pending.is_empty() {
            inner.aborted.remove(&ts);
        } else {
            inner.pending.offer(Marker::FullAborted(ts));
        }
    }

    /// Note the start of a transaction.
    pub fn transaction_started(&self, ts: Timestamp) {
        self.inner.lock().pending.offer(Marker::Started(ts));
    }

    /// Note the end of a transaction and apply any full aborts that were
    /// queued behind it.
    pub fn transaction_finished(&self, ts: Timestamp) {
        let mut inner = self.inner.lock();
        inner.pending.delete(Marker::Started(ts));

        while let Some(Marker::FullAborted(aborted_ts)) = inner.pending.peek().copied() {
            inner.aborted.remove(&aborted_ts);
            inner.pending.poll();
        }
    }

    /// Reset to empty. Used only during controlled reset/recovery.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.aborted.clear();
        inner.pending.clear();
    }
}

impl Default for SharedAbortedSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: u64) -> Timestamp {
        Timestamp::with_ts(raw)
    }

    #[test]
    fn test_simple_ops() {
        let aborted = SharedAbortedSet::new();
        aborted.add(ts(12));
        assert!(aborted.contains(ts(12)), "the reported abort is lost");
        aborted.remove(ts(12));
        assert!(
            !aborted.contains(ts(12)),
            "the reported full abort is lost"
        );
        aborted.add(ts(13));
        assert!(aborted.contains(ts(13)), "the reported abort is lost");
        aborted.transaction_started(ts(25));
        aborted.remove(ts(13));
        assert!(
            aborted.contains(ts(13)),
            "the full abort changes the read snapshot of a running transaction"
        );
        aborted.add(ts(14));
        assert!(aborted.contains(ts(14)), "the reported abort is lost");
        aborted.transaction_finished(ts(25));
        assert!(
            !aborted.contains(ts(13)),
            "the full abort is lost, even after commit of the outstanding transaction"
        );
        assert!(aborted.contains(ts(14)), "the reported abort is lost");
        aborted.remove(ts(14));
        assert!(
            !aborted.contains(ts(14)),
            "the full abort is lost, although there is no outstanding transaction"
        );
    }

    #[test]
    fn test_overlapping_transactions() {
        let aborted = SharedAbortedSet::new();
        for raw in 12..=17 {
            aborted.add(ts(raw));
        }
        aborted.transaction_started(ts(25));
        aborted.remove(ts(12));
        aborted.transaction_started(ts(26));
        aborted.remove(ts(13));
        aborted.remove(ts(14));
        aborted.remove(ts(15));
        aborted.transaction_started(ts(27));
        aborted.remove(ts(16));
        aborted.transaction_started(ts(28));
        aborted.remove(ts(17));
        for raw in 12..=17 {
            assert!(aborted.contains(ts(raw)), "the reported abort is lost");
        }

        aborted.transaction_finished(ts(25));
        assert!(!aborted.contains(ts(12)));
        for raw in 13..=17 {
            assert!(aborted.contains(ts(raw)));
        }

        aborted.transaction_finished(ts(26));
        for raw in 12..=15 {
            assert!(!aborted.contains(ts(raw)));
        }
        assert!(aborted.contains(ts(16)));
        assert!(aborted.contains(ts(17)));

        // 27 is still outstanding: 17's cleanup sits behind its start marker,
        // so finishing 28 must not flush anything.
        aborted.transaction_finished(ts(28));
        assert!(aborted.contains(ts(16)));
        assert!(aborted.contains(ts(17)));

        aborted.transaction_finished(ts(27));
        assert!(!aborted.contains(ts(16)));
        assert!(!aborted.contains(ts(17)));
    }

    #[test]
    fn test_visibility_held_for_reader_lifetime() {
        let aborted = SharedAbortedSet::new();
        aborted.add(ts(5));
        aborted.transaction_started(ts(30));
        aborted.remove(ts(5));
        assert!(aborted.contains(ts(5)));
        aborted.transaction_finished(ts(30));
        assert!(!aborted.contains(ts(5)));
    }

    #[test]
    fn test_immediate_cleanup_without_outstanding_transactions() {
        let aborted = SharedAbortedSet::new();
        aborted.add(ts(5));
        aborted.remove(ts(5));
        assert!(!aborted.contains(ts(5)));
    }

    #[test]
    fn test_readd_after_queued_removal() {
        let aborted = SharedAbortedSet::new();
        aborted.add(ts(5));
        aborted.transaction_started(ts(30));
        aborted.remove(ts(5));
        // A fresh abort for the same timestamp while its cleanup is queued.
        aborted.add(ts(5));
        aborted.transaction_finished(ts(30));
        // The queued cleanup erases it; re-adding afterwards works normally.
        assert!(!aborted.contains(ts(5)));
        aborted.add(ts(5));
        assert!(aborted.contains(ts(5)));
    }

    #[test]
    fn test_contains_unknown_is_false() {
        let aborted = SharedAbortedSet::new();
        assert!(!aborted.contains(ts(99)));
    }

    #[test]
    fn test_double_add_is_idempotent() {
        let aborted = SharedAbortedSet::new();
        aborted.add(ts(7));
        aborted.add(ts(7));
        assert!(aborted.contains(ts(7)));
        aborted.remove(ts(7));
        assert!(!aborted.contains(ts(7)));
    }

    #[test]
    fn test_clear_resets_both_structures() {
        let aborted = SharedAbortedSet::new();
        aborted.add(ts(1));
        aborted.transaction_started(ts(2));
        aborted.clear();
        assert!(!aborted.contains(ts(1)));
        // No outstanding transactions remain, so removal is immediate.
        aborted.add(ts(3));
        aborted.remove(ts(3));
        assert!(!aborted.contains(ts(3)));
    }

    #[test]
    fn test_started_and_full_aborted_markers_are_distinct() {
        assert_ne!(Marker::Started(ts(9)), Marker::FullAborted(ts(9)));
        assert_eq!(Marker::Started(ts(9)), Marker::Started(ts(9)));
    }
}
