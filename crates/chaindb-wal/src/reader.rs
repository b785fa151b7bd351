//! Sequential reading across segments.
//!
//! Each segment is loaded whole and decoded frame by frame. A segment with
//! a foreign header is skipped, and a damaged frame ends its segment: a
//! crash can only tear the tail of the segment being appended to, and the
//! writer never appends to a segment it did not create.

use crate::record::LogRecord;
use crate::segment::{list_segments, SegmentHeader, SEGMENT_HEADER_LEN};
use chaindb_core::Result;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct LogReader {
    pending: VecDeque<PathBuf>,
    current: Option<Loaded>,
    segments: usize,
}

struct Loaded {
    path: PathBuf,
    data: Vec<u8>,
    offset: usize,
}

impl LogReader {
    /// Read every segment in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        let paths = list_segments(dir)?.into_iter().map(|s| s.path).collect();
        Ok(Self::over(paths))
    }

    /// Read the given segments in the given order
    pub fn over(paths: Vec<PathBuf>) -> Self {
        Self {
            segments: paths.len(),
            pending: paths.into(),
            current: None,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments
    }

    fn load_next(&mut self) -> Result<bool> {
        while let Some(path) = self.pending.pop_front() {
            let data = fs::read(&path)?;
            match SegmentHeader::decode(&data) {
                Ok(_) => {
                    self.current = Some(Loaded {
                        path,
                        data,
                        offset: SEGMENT_HEADER_LEN,
                    });
                    return Ok(true);
                }
                // Created but never written
                Err(_) if data.is_empty() => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping log segment"),
            }
        }
        Ok(false)
    }

    /// The next record, or `None` after the last segment
    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        loop {
            let loaded = match self.current.as_mut() {
                Some(loaded) => loaded,
                None => {
                    if !self.load_next()? {
                        return Ok(None);
                    }
                    continue;
                }
            };

            if loaded.offset >= loaded.data.len() {
                self.current = None;
                continue;
            }
            match LogRecord::decode(&loaded.data[loaded.offset..]) {
                Ok((record, used)) => {
                    loaded.offset += used;
                    return Ok(Some(record));
                }
                Err(e) if e.is_torn_write() => {
                    warn!(
                        path = %loaded.path.display(),
                        offset = loaded.offset,
                        error = %e,
                        "log segment ends in a damaged record"
                    );
                    self.current = None;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<LogRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

impl Iterator for LogReader {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogEntry;
    use crate::segment::segment_path;
    use crate::writer::SegmentWriter;
    use crate::SyncMode;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_puts(dir: &Path, segment_bytes: u64, count: usize) {
        let mut writer = SegmentWriter::open(dir, segment_bytes, SyncMode::Sync).unwrap();
        for i in 0..count {
            writer
                .append(LogRecord::put(
                    1,
                    format!("key{}", i).into_bytes(),
                    format!("value{}", i).into_bytes(),
                ))
                .unwrap();
        }
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempdir().unwrap();
        let mut reader = LogReader::open(dir.path()).unwrap();
        assert_eq!(reader.segment_count(), 0);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_reads_in_lsn_order_across_segments() {
        let dir = tempdir().unwrap();
        write_puts(dir.path(), 100, 20);

        let mut reader = LogReader::open(dir.path()).unwrap();
        assert!(reader.segment_count() > 1);
        let records = reader.read_all().unwrap();
        let lsns: Vec<u64> = records.iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, (1..=20).collect::<Vec<u64>>());
        assert_eq!(
            records[0].entry,
            LogEntry::Put {
                file: 1,
                key: b"key0".to_vec(),
                value: b"value0".to_vec()
            }
        );
    }

    #[test]
    fn test_torn_tail_ends_segment() {
        let dir = tempdir().unwrap();
        write_puts(dir.path(), 64 * 1024 * 1024, 3);

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(segment_path(dir.path(), 1))
            .unwrap();
        file.write_all(&[9, 9, 9, 9, 40, 0, 0, 0, 1, 2]).unwrap();
        drop(file);

        let records: Vec<LogRecord> = LogReader::open(dir.path())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_foreign_segment_is_skipped() {
        let dir = tempdir().unwrap();
        write_puts(dir.path(), 64 * 1024 * 1024, 2);
        fs::write(segment_path(dir.path(), 100), b"not a segment header").unwrap();

        let records = LogReader::open(dir.path()).unwrap().read_all().unwrap();
        assert_eq!(records.len(), 2);
    }
}
