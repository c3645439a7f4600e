//! On-wire log record format and codec.
//!
//! Each record is a one-byte signed opcode (a reserved negative range)
//! followed by a fixed number of 8-byte big-endian fields: none for
//! `LogStart`, two for `Commit`, one for everything else. Records are
//! concatenated with no framing of their own; segment files provide framing
//! and checksums around the stream.

use tracing::trace;
use tso_transaction::Timestamp;

use crate::error::CodecError;

/// Protocol opcodes identifying record kinds.
pub const TIMESTAMP_ORACLE: i8 = -1;
pub const COMMIT: i8 = -2;
pub const LARGEST_DELETED_TIMESTAMP: i8 = -3;
pub const ABORT: i8 = -4;
pub const FULL_ABORT: i8 = -5;
pub const LOG_START: i8 = -6;
pub const SNAPSHOT: i8 = -7;

const FIELD_SIZE: usize = 8;

/// A single oracle log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecord {
    /// Persisted allocator value.
    TimestampOracle(Timestamp),
    /// A transaction committed: start timestamp, commit timestamp.
    Commit(Timestamp, Timestamp),
    /// High-water mark of deleted timestamps.
    LargestDeletedTimestamp(Timestamp),
    /// A transaction aborted.
    Abort(Timestamp),
    /// An aborted transaction was fully reconciled and may be forgotten.
    FullAbort(Timestamp),
    /// Checkpoint boundary: segments older than this one are unnecessary
    /// for recovery.
    LogStart,
    /// Snapshot id persisted alongside a checkpoint. Carried in an 8-byte
    /// field on the wire.
    Snapshot(u64),
}

impl LogRecord {
    /// Opcode identifying this record kind.
    pub fn opcode(&self) -> i8 {
        match self {
            LogRecord::TimestampOracle(_) => TIMESTAMP_ORACLE,
            LogRecord::Commit(_, _) => COMMIT,
            LogRecord::LargestDeletedTimestamp(_) => LARGEST_DELETED_TIMESTAMP,
            LogRecord::Abort(_) => ABORT,
            LogRecord::FullAbort(_) => FULL_ABORT,
            LogRecord::LogStart => LOG_START,
            LogRecord::Snapshot(_) => SNAPSHOT,
        }
    }

    /// Append the encoded record to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.opcode() as u8);
        match *self {
            LogRecord::TimestampOracle(ts)
            | LogRecord::LargestDeletedTimestamp(ts)
            | LogRecord::Abort(ts)
            | LogRecord::FullAbort(ts) => buf.extend_from_slice(&ts.raw().to_be_bytes()),
            LogRecord::Commit(start_ts, commit_ts) => {
                buf.extend_from_slice(&start_ts.raw().to_be_bytes());
                buf.extend_from_slice(&commit_ts.raw().to_be_bytes());
            }
            LogRecord::Snapshot(id) => buf.extend_from_slice(&id.to_be_bytes()),
            LogRecord::LogStart => {}
        }
    }
}

/// Sink for decoded records. Recovery provides one implementation per pass;
/// the decoder is oblivious to which is active.
pub trait RecordSink {
    fn timestamp_oracle(&mut self, timestamp: Timestamp);
    fn commit(&mut self, start_ts: Timestamp, commit_ts: Timestamp);
    fn largest_deleted_timestamp(&mut self, timestamp: Timestamp);
    fn abort(&mut self, timestamp: Timestamp);
    fn full_abort(&mut self, timestamp: Timestamp);
    fn log_start(&mut self);
    fn snapshot(&mut self, id: u64);
}

/// Decode a buffer of concatenated records, dispatching each to `sink` in
/// order until the buffer is exhausted.
///
/// Decoding is strict: an unknown opcode or a record cut short mid-field
/// fails the whole buffer, since a single corrupt byte desynchronizes the
/// unframed stream.
pub fn decode<S: RecordSink>(buf: &[u8], sink: &mut S) -> Result<(), CodecError> {
    let mut pos = 0;
    while pos < buf.len() {
        let record_start = pos;
        let op = buf[pos] as i8;
        pos += 1;
        trace!(opcode = op, offset = record_start, "decoding log record");
        match op {
            TIMESTAMP_ORACLE => {
                let timestamp = read_field(buf, &mut pos, record_start)?;
                sink.timestamp_oracle(Timestamp::with_ts(timestamp));
            }
            COMMIT => {
                let start_ts = read_field(buf, &mut pos, record_start)?;
                let commit_ts = read_field(buf, &mut pos, record_start)?;
                sink.commit(Timestamp::with_ts(start_ts), Timestamp::with_ts(commit_ts));
            }
            LARGEST_DELETED_TIMESTAMP => {
                let timestamp = read_field(buf, &mut pos, record_start)?;
                sink.largest_deleted_timestamp(Timestamp::with_ts(timestamp));
            }
            ABORT => {
                let timestamp = read_field(buf, &mut pos, record_start)?;
                sink.abort(Timestamp::with_ts(timestamp));
            }
            FULL_ABORT => {
                let timestamp = read_field(buf, &mut pos, record_start)?;
                sink.full_abort(Timestamp::with_ts(timestamp));
            }
            LOG_START => sink.log_start(),
            SNAPSHOT => {
                let id = read_field(buf, &mut pos, record_start)?;
                sink.snapshot(id);
            }
            _ => {
                return Err(CodecError::UnknownOpcode {
                    opcode: op,
                    offset: record_start,
                });
            }
        }
    }
    Ok(())
}

fn read_field(buf: &[u8], pos: &mut usize, record_start: usize) -> Result<u64, CodecError> {
    let end = *pos + FIELD_SIZE;
    let Some(bytes) = buf.get(*pos..end) else {
        return Err(CodecError::Truncated {
            offset: record_start,
        });
    };
    *pos = end;
    let mut field = [0u8; FIELD_SIZE];
    field.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(field))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records every sink call in order, as `LogRecord` values.
    #[derive(Debug, Default)]
    pub(crate) struct VecSink {
        pub(crate) records: Vec<LogRecord>,
    }

    impl RecordSink for VecSink {
        fn timestamp_oracle(&mut self, timestamp: Timestamp) {
            self.records.push(LogRecord::TimestampOracle(timestamp));
        }

        fn commit(&mut self, start_ts: Timestamp, commit_ts: Timestamp) {
            self.records.push(LogRecord::Commit(start_ts, commit_ts));
        }

        fn largest_deleted_timestamp(&mut self, timestamp: Timestamp) {
            self.records
                .push(LogRecord::LargestDeletedTimestamp(timestamp));
        }

        fn abort(&mut self, timestamp: Timestamp) {
            self.records.push(LogRecord::Abort(timestamp));
        }

        fn full_abort(&mut self, timestamp: Timestamp) {
            self.records.push(LogRecord::FullAbort(timestamp));
        }

        fn log_start(&mut self) {
            self.records.push(LogRecord::LogStart);
        }

        fn snapshot(&mut self, id: u64) {
            self.records.push(LogRecord::Snapshot(id));
        }
    }

    pub(crate) fn encode_all(records: &[LogRecord]) -> Vec<u8> {
        let mut buf = Vec::new();
        for record in records {
            record.encode_into(&mut buf);
        }
        buf
    }

    fn ts(raw: u64) -> Timestamp {
        Timestamp::with_ts(raw)
    }

    #[test]
    fn test_round_trip_all_record_kinds() {
        let records = vec![
            LogRecord::TimestampOracle(ts(100)),
            LogRecord::Commit(ts(101), ts(102)),
            LogRecord::LargestDeletedTimestamp(ts(90)),
            LogRecord::Abort(ts(103)),
            LogRecord::FullAbort(ts(103)),
            LogRecord::LogStart,
            LogRecord::Snapshot(3),
        ];
        let buf = encode_all(&records);

        let mut sink = VecSink::default();
        decode(&buf, &mut sink).unwrap();
        assert_eq!(sink.records, records);
    }

    #[test]
    fn test_wire_layout_is_opcode_plus_big_endian_fields() {
        let mut buf = Vec::new();
        LogRecord::Commit(ts(1), ts(0x0102)).encode_into(&mut buf);
        assert_eq!(buf.len(), 17);
        assert_eq!(buf[0] as i8, COMMIT);
        assert_eq!(&buf[1..9], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&buf[9..17], &[0, 0, 0, 0, 0, 0, 1, 2]);

        let mut buf = Vec::new();
        LogRecord::LogStart.encode_into(&mut buf);
        assert_eq!(buf, vec![LOG_START as u8]);
    }

    #[test]
    fn test_empty_buffer_decodes_to_nothing() {
        let mut sink = VecSink::default();
        decode(&[], &mut sink).unwrap();
        assert!(sink.records.is_empty());
    }

    #[test]
    fn test_unknown_opcode_fails_decode() {
        let mut buf = encode_all(&[LogRecord::Abort(ts(5))]);
        buf.push(0x2a);
        let mut sink = VecSink::default();
        let err = decode(&buf, &mut sink).unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnknownOpcode { opcode: 0x2a, offset: 9 }
        ));
        // Records ahead of the corruption were still dispatched.
        assert_eq!(sink.records, vec![LogRecord::Abort(ts(5))]);
    }

    #[test]
    fn test_truncated_record_fails_decode() {
        let mut buf = encode_all(&[LogRecord::Commit(ts(1), ts(2))]);
        buf.truncate(buf.len() - 3);
        let mut sink = VecSink::default();
        let err = decode(&buf, &mut sink).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { offset: 0 }));
    }
}
