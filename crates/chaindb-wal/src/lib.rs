//! # chaindb WAL
//!
//! The write-ahead log under both chaindb engines. Records carry a log
//! sequence number (LSN), and an engine remembers the LSN its durable state
//! covers. On open it replays what lies above that LSN, and after a
//! checkpoint it deletes the segments that lie wholly below it.
//!
//! ```text
//! <dir>/
//!   log.0000000000000001
//!   log.00000000000004d2   named after the LSN of its first record
//! ```
//!
//! This crate is an internal building block of `chaindb`.

use chaindb_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod reader;
pub mod record;
pub mod replay;
pub mod segment;
pub mod writer;

pub use reader::LogReader;
pub use record::{LogEntry, LogRecord, FRAME_OVERHEAD};
pub use replay::{replay, LogStats, Replay};
pub use segment::{list_segments, remove_segments_before, SegmentHeader, SegmentInfo};
pub use writer::SegmentWriter;

/// When appends reach the disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// fsync after every append or group
    Sync,
    /// Hand appends to the OS; fsync on rotation and close
    Async,
    /// Leave appends buffered until rotation, close or an explicit sync
    None,
}

#[derive(Debug, Clone)]
pub struct WalOptions {
    pub dir: PathBuf,
    pub sync_mode: SyncMode,
    /// A segment that reaches this size is closed and a new one started
    pub segment_bytes: u64,
}

impl WalOptions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sync_mode: SyncMode::Sync,
            segment_bytes: 16 * 1024 * 1024,
        }
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_segment_bytes(mut self, bytes: u64) -> Self {
        self.segment_bytes = bytes;
        self
    }
}

/// An open log.
///
/// Appends fail once the log is closed; reading what is on disk does not.
pub struct Wal {
    options: WalOptions,
    writer: Option<SegmentWriter>,
}

impl Wal {
    /// Open the log in `options.dir`, creating the directory.
    ///
    /// Numbering continues after the newest record on disk.
    pub fn open(options: WalOptions) -> Result<Self> {
        let writer = SegmentWriter::open(&options.dir, options.segment_bytes, options.sync_mode)?;
        Ok(Self {
            options,
            writer: Some(writer),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.options.dir
    }

    pub fn options(&self) -> &WalOptions {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn writer(&mut self) -> Result<&mut SegmentWriter> {
        self.writer.as_mut().ok_or_else(|| {
            Error::InvalidInput(format!("log {} is closed", self.options.dir.display()))
        })
    }

    /// Append one record and return its LSN
    pub fn append(&mut self, record: LogRecord) -> Result<u64> {
        self.writer()?.append(record)
    }

    /// Append a group behind one sync and return the last LSN
    pub fn append_all(&mut self, records: Vec<LogRecord>) -> Result<u64> {
        self.writer()?.append_all(records)
    }

    pub fn sync(&mut self) -> Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.sync(),
            None => Ok(()),
        }
    }

    /// Sync and stop accepting appends
    pub fn close(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.sync(),
            None => Ok(()),
        }
    }

    /// Last LSN handed out; 0 for a log that was never written
    pub fn last_lsn(&self) -> u64 {
        self.writer.as_ref().map_or(0, SegmentWriter::last_lsn)
    }

    /// Frame bytes appended since the log was opened
    pub fn bytes_written(&self) -> u64 {
        self.writer.as_ref().map_or(0, SegmentWriter::appended)
    }

    /// Start a new segment and return its first LSN. Every record below
    /// the returned LSN lives in an older segment.
    pub fn rotate(&mut self) -> Result<u64> {
        self.writer()?.rotate()
    }

    /// Delete the segments that start below `lsn`, a boundary returned by
    /// [`Wal::rotate`]
    pub fn remove_before(&self, lsn: u64) -> Result<usize> {
        remove_segments_before(&self.options.dir, lsn)
    }

    /// Rotate, then delete every older segment.
    ///
    /// The caller must have made the records in them durable elsewhere.
    pub fn reclaim(&mut self) -> Result<usize> {
        let boundary = self.rotate()?;
        self.remove_before(boundary)
    }

    /// Committed data records on disk, in replay order
    pub fn replay(&self) -> Result<Replay> {
        replay(&self.options.dir)
    }

    /// A reader over every record on disk
    pub fn reader(&self) -> Result<LogReader> {
        LogReader::open(&self.options.dir)
    }

    pub fn segments(&self) -> Result<Vec<SegmentInfo>> {
        list_segments(&self.options.dir)
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.options.dir)
            .field("open", &self.is_open())
            .field("last_lsn", &self.last_lsn())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn put(i: usize) -> LogRecord {
        LogRecord::put(
            0,
            format!("key{}", i).into_bytes(),
            format!("value{}", i).into_bytes(),
        )
    }

    #[test]
    fn test_options_builder() {
        let options = WalOptions::new("log")
            .with_sync_mode(SyncMode::Async)
            .with_segment_bytes(4096);
        assert_eq!(options.dir, PathBuf::from("log"));
        assert_eq!(options.sync_mode, SyncMode::Async);
        assert_eq!(options.segment_bytes, 4096);
    }

    #[test]
    fn test_closed_log_refuses_appends() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(WalOptions::new(dir.path())).unwrap();
        wal.append(put(0)).unwrap();
        wal.close().unwrap();

        assert!(!wal.is_open());
        assert!(matches!(wal.append(put(1)), Err(Error::InvalidInput(_))));
        wal.close().unwrap();
        assert_eq!(wal.replay().unwrap().records.len(), 1);
    }

    #[test]
    fn test_reclaim_keeps_only_new_segment() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(WalOptions::new(dir.path())).unwrap();
        for i in 0..3 {
            wal.append(put(i)).unwrap();
        }

        assert_eq!(wal.reclaim().unwrap(), 1);
        assert!(wal.replay().unwrap().records.is_empty());
        assert_eq!(wal.segments().unwrap().len(), 1);

        assert_eq!(wal.append(put(3)).unwrap(), 4);
        assert_eq!(wal.replay().unwrap().records.len(), 1);
    }
}
