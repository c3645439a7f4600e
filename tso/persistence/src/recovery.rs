//! Two-pass reconstruction of oracle state from persisted log segments.
//!
//! Recovery first scans segments newest-first until it has seen enough
//! history ([`ScanSink`]), then replays the retained segments in
//! chronological order into live state ([`ReplaySink`]). Both passes run
//! single-threaded, strictly before the oracle accepts any traffic.

use std::collections::HashMap;

use tracing::{debug, info};
use tso_transaction::{SharedAbortedSet, Timestamp, TimestampAllocator};

use crate::error::PersistenceResult;
use crate::record::{self, RecordSink};

/// Supplies persisted log segments to recovery, newest first.
pub trait SegmentSupplier {
    /// The next segment going backwards in time, or `None` once the log is
    /// exhausted.
    fn next_older(&mut self) -> PersistenceResult<Option<Vec<u8>>>;
}

/// The oracle state rebuilt by replay, adopted by the oracle before it
/// begins serving requests.
#[derive(Debug, Default)]
pub struct OracleState {
    allocator: TimestampAllocator,
    largest_deleted: Timestamp,
    commits: HashMap<Timestamp, Timestamp>,
    aborted: SharedAbortedSet,
    initialized: bool,
}

impl OracleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The start-timestamp allocator, seeded past the highest persisted
    /// allocator value.
    pub fn allocator(&self) -> &TimestampAllocator {
        &self.allocator
    }

    /// High-water mark of deleted timestamps.
    pub fn largest_deleted(&self) -> Timestamp {
        self.largest_deleted
    }

    /// Commit timestamp recorded for `start_ts`, if it committed.
    pub fn commit_of(&self, start_ts: Timestamp) -> Option<Timestamp> {
        self.commits.get(&start_ts).copied()
    }

    /// The rebuilt aborted-transaction set.
    pub fn aborted(&self) -> &SharedAbortedSet {
        &self.aborted
    }

    /// True once a persisted allocator value has been applied. An oracle
    /// must not serve traffic from an uninitialized state.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self, ts: Timestamp) {
        self.allocator.advance_to(ts);
        self.initialized = true;
    }

    fn raise_largest_deleted(&mut self, ts: Timestamp) {
        self.largest_deleted = self.largest_deleted.max(ts);
    }

    fn record_commit(&mut self, start_ts: Timestamp, commit_ts: Timestamp) {
        self.commits.insert(start_ts, commit_ts);
    }
}

/// Scan pass: determines how much log history must be read before the
/// oracle state can be fully reconstructed.
#[derive(Debug, Default)]
pub struct ScanSink {
    saw_oracle_init: bool,
    saw_commits_past_watermark: bool,
    saw_aborts: bool,
    saw_checkpoint: bool,
    scanned_watermark: Timestamp,
    last_snapshot: Option<u64>,
}

impl ScanSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once enough history has been observed: either every category of
    /// state has been seen, or a checkpoint boundary makes older segments
    /// unnecessary. Monotonic: further records never turn this false.
    pub fn finished_scan(&self) -> bool {
        (self.saw_oracle_init && self.saw_commits_past_watermark && self.saw_aborts)
            || self.saw_checkpoint
    }
}

impl RecordSink for ScanSink {
    fn timestamp_oracle(&mut self, _timestamp: Timestamp) {
        self.saw_oracle_init = true;
    }

    fn commit(&mut self, _start_ts: Timestamp, commit_ts: Timestamp) {
        if commit_ts < self.scanned_watermark {
            self.saw_commits_past_watermark = true;
        }
    }

    fn largest_deleted_timestamp(&mut self, timestamp: Timestamp) {
        self.scanned_watermark = self.scanned_watermark.max(timestamp);
    }

    fn abort(&mut self, _timestamp: Timestamp) {
        self.saw_aborts = true;
    }

    fn full_abort(&mut self, _timestamp: Timestamp) {
        self.saw_aborts = true;
    }

    fn log_start(&mut self) {
        self.saw_checkpoint = true;
    }

    fn snapshot(&mut self, id: u64) {
        // A snapshot id larger than one already recorded means abort state
        // was snapshotted more than once, so abort activity exists.
        match self.last_snapshot {
            Some(last) if id > last => {
                self.saw_aborts = true;
                self.last_snapshot = Some(id);
            }
            Some(_) => {}
            None => self.last_snapshot = Some(id),
        }
    }
}

/// Replay pass: applies each record directly to live oracle state.
#[derive(Default)]
pub struct ReplaySink {
    state: OracleState,
}

impl ReplaySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_state(self) -> OracleState {
        self.state
    }
}

impl RecordSink for ReplaySink {
    fn timestamp_oracle(&mut self, timestamp: Timestamp) {
        self.state.initialize(timestamp);
    }

    fn commit(&mut self, start_ts: Timestamp, commit_ts: Timestamp) {
        self.state.record_commit(start_ts, commit_ts);
    }

    fn largest_deleted_timestamp(&mut self, timestamp: Timestamp) {
        self.state.raise_largest_deleted(timestamp);
    }

    fn abort(&mut self, timestamp: Timestamp) {
        self.state.aborted.add(timestamp);
    }

    fn full_abort(&mut self, timestamp: Timestamp) {
        self.state.aborted.remove(timestamp);
    }

    fn log_start(&mut self) {}

    fn snapshot(&mut self, _id: u64) {}
}

/// Drives the scan and replay passes over supplied segments.
pub struct RecoveryStateMachine {
    scan: ScanSink,
    // Scanned segments, newest first, retained for the replay pass.
    scanned: Vec<Vec<u8>>,
}

impl RecoveryStateMachine {
    pub fn new() -> Self {
        Self {
            scan: ScanSink::new(),
            scanned: Vec::new(),
        }
    }

    /// Feed the next (older) segment through the scan pass. Returns whether
    /// the scan is complete.
    pub fn scan_segment(&mut self, segment: Vec<u8>) -> PersistenceResult<bool> {
        record::decode(&segment, &mut self.scan)?;
        self.scanned.push(segment);
        Ok(self.scan.finished_scan())
    }

    pub fn finished_scan(&self) -> bool {
        self.scan.finished_scan()
    }

    /// Replay the scanned segments in chronological order into fresh oracle
    /// state.
    pub fn replay(self) -> PersistenceResult<OracleState> {
        let mut replay = ReplaySink::new();
        for segment in self.scanned.iter().rev() {
            record::decode(segment, &mut replay)?;
        }
        Ok(replay.into_state())
    }

    /// Run both passes over `supplier`'s segments. A decode or segment read
    /// failure is fatal: the oracle must not serve traffic with partially
    /// reconstructed state.
    pub fn recover<S: SegmentSupplier>(supplier: &mut S) -> PersistenceResult<OracleState> {
        let mut machine = Self::new();
        info!("starting oracle recovery");
        while !machine.finished_scan() {
            match supplier.next_older()? {
                Some(segment) => {
                    machine.scan_segment(segment)?;
                }
                // The whole log is needed.
                None => break,
            }
        }
        debug!(
            segments = machine.scanned.len(),
            finished = machine.finished_scan(),
            "scan pass complete"
        );
        let state = machine.replay()?;
        info!(
            next_timestamp = state.allocator().current().raw(),
            largest_deleted = state.largest_deleted().raw(),
            "oracle recovery complete"
        );
        Ok(state)
    }
}

impl Default for RecoveryStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
