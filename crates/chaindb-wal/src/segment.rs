//! Segment files.
//!
//! A segment is named after the LSN of its first record, `log.<lsn as 16
//! hex digits>`, and starts with a fixed header:
//!
//! ```text
//! [magic: u32 LE] [version: u16 LE] [first_lsn: u64 LE]
//! ```

use chaindb_core::format_version::{magic, wal_version, WAL_FORMAT_VERSION};
use chaindb_core::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SEGMENT_HEADER_LEN: usize = 4 + 2 + 8;

const PREFIX: &str = "log.";

pub fn segment_path(dir: &Path, first_lsn: u64) -> PathBuf {
    dir.join(format!("{}{:016x}", PREFIX, first_lsn))
}

fn parse_first_lsn(path: &Path) -> Option<u64> {
    let digits = path.file_name()?.to_str()?.strip_prefix(PREFIX)?;
    if digits.len() != 16 {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub version: u16,
    pub first_lsn: u64,
}

impl SegmentHeader {
    pub fn new(first_lsn: u64) -> Self {
        Self {
            version: WAL_FORMAT_VERSION,
            first_lsn,
        }
    }

    pub fn encode(&self) -> [u8; SEGMENT_HEADER_LEN] {
        let mut buf = [0u8; SEGMENT_HEADER_LEN];
        buf[..4].copy_from_slice(&magic::WAL.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..].copy_from_slice(&self.first_lsn.to_le_bytes());
        buf
    }

    /// Parse the header at the start of `data`
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < SEGMENT_HEADER_LEN {
            return Err(Error::Truncated(format!(
                "segment header needs {} bytes, found {}",
                SEGMENT_HEADER_LEN,
                data.len()
            )));
        }
        let found = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if found != magic::WAL {
            return Err(Error::Corruption(format!("not a log segment (magic {:#x})", found)));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if !wal_version().can_read(version) {
            return Err(Error::Corruption(format!(
                "log segment format {} is not supported",
                version
            )));
        }
        let mut lsn = [0u8; 8];
        lsn.copy_from_slice(&data[6..SEGMENT_HEADER_LEN]);
        Ok(Self {
            version,
            first_lsn: u64::from_le_bytes(lsn),
        })
    }
}

/// A segment found on disk
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub path: PathBuf,
    /// Taken from the file name
    pub first_lsn: u64,
    pub size: u64,
}

/// Every segment in `dir`, oldest first. A missing directory has none.
pub fn list_segments(dir: &Path) -> Result<Vec<SegmentInfo>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if let Some(first_lsn) = parse_first_lsn(&path) {
            segments.push(SegmentInfo {
                size: entry.metadata()?.len(),
                first_lsn,
                path,
            });
        }
    }
    segments.sort_by_key(|s| s.first_lsn);
    Ok(segments)
}

/// Delete the segments that start below `lsn`.
///
/// `lsn` must be a segment boundary, otherwise records at or above it are
/// lost with the segment holding them.
pub fn remove_segments_before(dir: &Path, lsn: u64) -> Result<usize> {
    let mut removed = 0;
    for segment in list_segments(dir)? {
        if segment.first_lsn >= lsn {
            break;
        }
        fs::remove_file(&segment.path)?;
        debug!(path = %segment.path.display(), "removed log segment");
        removed += 1;
    }
    Ok(removed)
}
