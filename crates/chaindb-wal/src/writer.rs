//! Appending and LSN assignment.

use crate::reader::LogReader;
use crate::record::LogRecord;
use crate::segment::{list_segments, segment_path, SegmentHeader, SEGMENT_HEADER_LEN};
use crate::SyncMode;
use chaindb_core::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

/// Appends records to the newest segment, starting a new one when it fills.
pub struct SegmentWriter {
    dir: PathBuf,
    out: BufWriter<File>,
    /// LSN of the first record the current segment holds or will hold
    first_lsn: u64,
    segment_len: u64,
    segment_bytes: u64,
    sync_mode: SyncMode,
    last_lsn: u64,
    appended: u64,
}

impl SegmentWriter {
    /// Open for appending after the newest record in `dir`.
    ///
    /// Appends always go to a fresh segment, so a tail torn by a crash is
    /// never extended.
    pub fn open(dir: &Path, segment_bytes: u64, sync_mode: SyncMode) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let last_lsn = newest_lsn(dir)?;
        let first_lsn = last_lsn + 1;
        Ok(Self {
            out: start_segment(dir, first_lsn)?,
            dir: dir.to_path_buf(),
            first_lsn,
            segment_len: SEGMENT_HEADER_LEN as u64,
            segment_bytes,
            sync_mode,
            last_lsn,
            appended: 0,
        })
    }

    /// Append one record and return its LSN
    pub fn append(&mut self, record: LogRecord) -> Result<u64> {
        let lsn = self.push(record)?;
        self.barrier()?;
        Ok(lsn)
    }

    /// Append records behind one durability barrier and return the last
    /// LSN. A group can straddle a segment boundary.
    pub fn append_all(&mut self, records: Vec<LogRecord>) -> Result<u64> {
        for record in records {
            self.push(record)?;
        }
        self.barrier()?;
        Ok(self.last_lsn)
    }

    fn push(&mut self, mut record: LogRecord) -> Result<u64> {
        record.lsn = self.last_lsn + 1;
        let frame = record.encode()?;
        let len = frame.len() as u64;
        if self.segment_len + len > self.segment_bytes && !self.segment_is_empty() {
            self.rotate()?;
        }
        self.out.write_all(&frame)?;
        self.segment_len += len;
        self.appended += len;
        self.last_lsn = record.lsn;
        Ok(record.lsn)
    }

    fn barrier(&mut self) -> Result<()> {
        match self.sync_mode {
            SyncMode::Sync => self.sync(),
            SyncMode::Async => Ok(self.out.flush()?),
            SyncMode::None => Ok(()),
        }
    }

    pub fn sync(&mut self) -> Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_data()?;
        Ok(())
    }

    /// Close the current segment and start the next one at the next LSN.
    ///
    /// Returns the new segment's first LSN: every record below it lives in
    /// an older segment. An empty current segment is kept as is.
    pub fn rotate(&mut self) -> Result<u64> {
        if self.segment_is_empty() {
            return Ok(self.first_lsn);
        }
        self.sync()?;
        self.first_lsn = self.last_lsn + 1;
        self.out = start_segment(&self.dir, self.first_lsn)?;
        self.segment_len = SEGMENT_HEADER_LEN as u64;
        trace!(first_lsn = self.first_lsn, "started log segment");
        Ok(self.first_lsn)
    }

    fn segment_is_empty(&self) -> bool {
        self.segment_len == SEGMENT_HEADER_LEN as u64
    }

    pub fn segment_path(&self) -> PathBuf {
        segment_path(&self.dir, self.first_lsn)
    }

    pub fn first_lsn(&self) -> u64 {
        self.first_lsn
    }

    pub fn last_lsn(&self) -> u64 {
        self.last_lsn
    }

    /// Frame bytes appended since opening
    pub fn appended(&self) -> u64 {
        self.appended
    }

    pub fn segment_len(&self) -> u64 {
        self.segment_len
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            warn!(path = %self.segment_path().display(), error = %e, "failed to sync log segment");
        }
    }
}

/// Highest LSN in the newest segment, or the one just before its first
/// record when it holds none
fn newest_lsn(dir: &Path) -> Result<u64> {
    let newest = match list_segments(dir)?.pop() {
        Some(newest) => newest,
        None => return Ok(0),
    };
    let mut last = newest.first_lsn.saturating_sub(1);
    for record in LogReader::over(vec![newest.path]) {
        last = last.max(record?.lsn);
    }
    Ok(last)
}

fn start_segment(dir: &Path, first_lsn: u64) -> Result<BufWriter<File>> {
    // A file already under this name holds nothing past `first_lsn - 1`
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(segment_path(dir, first_lsn))?;
    let mut out = BufWriter::new(file);
    out.write_all(&SegmentHeader::new(first_lsn).encode())?;
    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(out)
}
