//! Write-ahead-log persistence for the tso timestamp oracle.
//!
//! Defines the on-wire record codec, checksummed segment storage, and the
//! two-pass recovery state machine that rebuilds oracle state after a
//! restart.

pub mod error;
pub mod record;
pub mod recovery;
pub mod segment;

pub use error::{CodecError, PersistenceError, PersistenceResult, SegmentError};
pub use record::{LogRecord, RecordSink, decode};
pub use recovery::{OracleState, RecoveryStateMachine, ReplaySink, ScanSink, SegmentSupplier};
pub use segment::{FileSegmentSupplier, SegmentLog, SegmentLogConfig};
