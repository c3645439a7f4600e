//! Transaction-status infrastructure for the tso timestamp oracle.
//!
//! This crate provides the start-timestamp allocator and the shared
//! aborted-transaction tracking consumed by the oracle's commit path
//! and by the read path's visibility checks.

pub mod aborted;
pub mod error;
pub mod queue;
pub mod timestamp;

pub use aborted::{Marker, SharedAbortedSet};
pub use error::TimestampError;
pub use queue::DeleteEfficientQueue;
pub use timestamp::{Timestamp, TimestampAllocator};
