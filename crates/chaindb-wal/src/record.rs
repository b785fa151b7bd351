//! Log records and their on-disk frame.
//!
//! ```text
//! [crc32: u32 LE] [len: u32 LE] [lsn: u64 LE] [entry: len bytes, bincode]
//! ```
//!
//! The checksum covers everything after it, so a damaged length or LSN is
//! caught the same way as a damaged entry.

use chaindb_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Bytes of a frame that are not entry: checksum, length and LSN.
pub const FRAME_OVERHEAD: usize = 4 + 4 + 8;

/// Entries larger than this are treated as damage rather than allocated.
pub const MAX_ENTRY_LEN: usize = 64 * 1024 * 1024;

/// What a log record says happened.
///
/// `file` names the logical file a data entry belongs to. Engines that keep
/// one log per store write `0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    Put { file: u64, key: Vec<u8>, value: Vec<u8> },
    Delete { file: u64, key: Vec<u8> },
    /// Opens a group; data entries up to the matching commit belong to it
    Begin { txn: u64 },
    Commit { txn: u64 },
    /// Every record at or below `covered` is durable outside the log
    Checkpoint { covered: u64 },
}

impl LogEntry {
    /// The file a data entry targets
    pub fn file(&self) -> Option<u64> {
        match self {
            LogEntry::Put { file, .. } | LogEntry::Delete { file, .. } => Some(*file),
            _ => None,
        }
    }

    pub fn is_data(&self) -> bool {
        self.file().is_some()
    }
}

/// A log entry stamped with its sequence number.
///
/// The writer assigns `lsn` on append; the constructors leave it at 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: u64,
    pub entry: LogEntry,
}

impl LogRecord {
    fn unstamped(entry: LogEntry) -> Self {
        Self { lsn: 0, entry }
    }

    pub fn put(file: u64, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self::unstamped(LogEntry::Put { file, key, value })
    }

    pub fn delete(file: u64, key: Vec<u8>) -> Self {
        Self::unstamped(LogEntry::Delete { file, key })
    }

    pub fn begin(txn: u64) -> Self {
        Self::unstamped(LogEntry::Begin { txn })
    }

    pub fn commit(txn: u64) -> Self {
        Self::unstamped(LogEntry::Commit { txn })
    }

    pub fn checkpoint(covered: u64) -> Self {
        Self::unstamped(LogEntry::Checkpoint { covered })
    }

    /// Frame the record for appending
    pub fn encode(&self) -> Result<Vec<u8>> {
        let entry = bincode::serialize(&self.entry)?;
        let mut frame = Vec::with_capacity(FRAME_OVERHEAD + entry.len());
        frame.extend_from_slice(&[0; 4]);
        frame.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        frame.extend_from_slice(&self.lsn.to_le_bytes());
        frame.extend_from_slice(&entry);

        let crc = crc32fast::hash(&frame[4..]);
        frame[..4].copy_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Decode the frame at the start of `data`.
    ///
    /// Returns the record and the number of bytes it occupied. A frame cut
    /// short is [`Error::Truncated`]; a frame whose checksum does not match
    /// is [`Error::Corruption`].
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < FRAME_OVERHEAD {
            return Err(Error::Truncated(format!(
                "{} bytes left, a frame needs at least {}",
                data.len(),
                FRAME_OVERHEAD
            )));
        }

        let crc = read_u32(data, 0);
        let len = read_u32(data, 4) as usize;
        if len > MAX_ENTRY_LEN {
            return Err(Error::Corruption(format!("entry length {} out of range", len)));
        }
        let end = FRAME_OVERHEAD + len;
        if data.len() < end {
            return Err(Error::Truncated(format!(
                "frame needs {} bytes, {} left",
                end,
                data.len()
            )));
        }

        let actual = crc32fast::hash(&data[4..end]);
        if actual != crc {
            return Err(Error::Corruption(format!(
                "frame checksum {:#010x} does not match {:#010x}",
                actual, crc
            )));
        }

        let mut lsn = [0u8; 8];
        lsn.copy_from_slice(&data[8..16]);
        let entry: LogEntry = bincode::deserialize(&data[FRAME_OVERHEAD..end])?;
        Ok((
            Self {
                lsn: u64::from_le_bytes(lsn),
                entry,
            },
            end,
        ))
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}
