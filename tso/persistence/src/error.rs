use thiserror::Error;

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Segment error: {0}")]
    Segment(#[from] SegmentError),
}

/// Errors raised while decoding a record stream. The stream carries no
/// per-record framing, so any of these leaves the remainder of the buffer
/// unusable and must abort recovery of the segment.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unknown opcode {opcode} at offset {offset}, log is corrupt")]
    UnknownOpcode { opcode: i8, offset: usize },
    #[error("record truncated at offset {offset}")]
    Truncated { offset: usize },
}

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame checksum mismatch in segment {segment}")]
    ChecksumMismatch { segment: String },
    #[error("truncated frame in segment {segment}")]
    TruncatedFrame { segment: String },
}
