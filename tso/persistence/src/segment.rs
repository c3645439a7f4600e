//! File-backed storage of oracle log segments.
//!
//! Each segment is one append-only file of checksummed frames:
//!
//! ```text
//! ┌────────────┬────────────┬───────────┐
//! │ u32 len    │ u32 crc32  │ payload…  │
//! └────────────┴────────────┴───────────┘
//! ```
//!
//! (little-endian headers). Frame payloads concatenate into the segment's
//! record stream; the record format itself carries no framing of its own.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use tracing::debug;

use crate::error::{PersistenceResult, SegmentError};
use crate::record::LogRecord;
use crate::recovery::SegmentSupplier;

const HEADER_SIZE: usize = 8; // 4 bytes length + 4 bytes crc32
const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".log";

/// Where segment files live.
#[derive(Debug, Clone)]
pub struct SegmentLogConfig {
    pub dir: PathBuf,
}

impl Default for SegmentLogConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("tso-segments"),
        }
    }
}

/// Append-only writer for the current log segment.
///
/// Opening always starts a fresh segment after any existing ones; a segment
/// that was live during a crash is never appended to again.
pub struct SegmentLog {
    dir: PathBuf,
    index: u64,
    file: BufWriter<File>,
    batch: Vec<u8>,
}

impl SegmentLog {
    pub fn open(config: SegmentLogConfig) -> PersistenceResult<Self> {
        fs::create_dir_all(&config.dir).map_err(SegmentError::Io)?;
        let index = match list_segments(&config.dir)?.last() {
            Some((last, _)) => last + 1,
            None => 0,
        };
        let file = create_segment(&config.dir, index)?;
        Ok(Self {
            dir: config.dir,
            index,
            file,
            batch: Vec::new(),
        })
    }

    /// Index of the segment currently being written.
    pub fn current_segment(&self) -> u64 {
        self.index
    }

    /// Buffer a record for the next frame. Call [`SegmentLog::flush`] to make
    /// it durable.
    pub fn append(&mut self, record: &LogRecord) {
        record.encode_into(&mut self.batch);
    }

    /// Write the buffered records as one checksummed frame and fsync.
    pub fn flush(&mut self) -> PersistenceResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let mut hasher = Hasher::new();
        hasher.update(&self.batch);
        let checksum = hasher.finalize();
        let len = self.batch.len() as u32;

        // Write the whole frame in one operation.
        let mut data = Vec::with_capacity(HEADER_SIZE + self.batch.len());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&checksum.to_le_bytes());
        data.extend_from_slice(&self.batch);

        self.file.write_all(&data).map_err(SegmentError::Io)?;
        self.file.flush().map_err(SegmentError::Io)?;
        self.file
            .get_ref()
            .sync_data()
            .map_err(SegmentError::Io)?;
        self.batch.clear();
        Ok(())
    }

    /// Finish the current segment and begin the next one as a checkpoint:
    /// the new segment opens with the caller's state-snapshot records
    /// followed by a `LogStart` boundary, so recovery never needs to scan
    /// past it.
    pub fn roll(&mut self, checkpoint: &[LogRecord]) -> PersistenceResult<()> {
        self.flush()?;
        self.index += 1;
        self.file = create_segment(&self.dir, self.index)?;
        debug!(segment = self.index, "rolled to new segment");

        for record in checkpoint {
            self.append(record);
        }
        self.append(&LogRecord::LogStart);
        self.flush()
    }
}

/// Reads segment payloads back newest-first for recovery.
pub struct FileSegmentSupplier {
    // Sorted by segment index, ascending; consumed from the back.
    paths: Vec<PathBuf>,
}

impl FileSegmentSupplier {
    pub fn open(dir: impl AsRef<Path>) -> PersistenceResult<Self> {
        let paths = list_segments(dir.as_ref())?
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        Ok(Self { paths })
    }
}

impl SegmentSupplier for FileSegmentSupplier {
    fn next_older(&mut self) -> PersistenceResult<Option<Vec<u8>>> {
        let Some(path) = self.paths.pop() else {
            return Ok(None);
        };
        Ok(Some(read_segment(&path)?))
    }
}

fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{index:06}{SEGMENT_SUFFIX}"))
}

fn create_segment(dir: &Path, index: u64) -> Result<BufWriter<File>, SegmentError> {
    let file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(segment_path(dir, index))?;
    Ok(BufWriter::new(file))
}

/// Segment files in `dir`, sorted by index, ascending.
fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>, SegmentError> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(stem) = name
            .strip_prefix(SEGMENT_PREFIX)
            .and_then(|rest| rest.strip_suffix(SEGMENT_SUFFIX))
        else {
            continue;
        };
        if let Ok(index) = stem.parse::<u64>() {
            segments.push((index, entry.path()));
        }
    }
    segments.sort_by_key(|(index, _)| *index);
    Ok(segments)
}

/// Read one segment file, verifying each frame's checksum, and concatenate
/// the payloads into the segment's record stream.
fn read_segment(path: &Path) -> Result<Vec<u8>, SegmentError> {
    let segment = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let mut payload = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes.len() - pos < HEADER_SIZE {
            return Err(SegmentError::TruncatedFrame { segment });
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[pos..pos + 4]);
        let len = u32::from_le_bytes(word) as usize;
        word.copy_from_slice(&bytes[pos + 4..pos + 8]);
        let checksum = u32::from_le_bytes(word);
        pos += HEADER_SIZE;

        let end = pos + len;
        if end > bytes.len() {
            return Err(SegmentError::TruncatedFrame { segment });
        }
        let frame = &bytes[pos..end];
        let mut hasher = Hasher::new();
        hasher.update(frame);
        if hasher.finalize() != checksum {
            return Err(SegmentError::ChecksumMismatch { segment });
        }
        payload.extend_from_slice(frame);
        pos = end;
    }
    Ok(payload)
}
