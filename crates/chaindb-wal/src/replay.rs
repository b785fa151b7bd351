//! Recovering committed work from the log.
//!
//! Data records outside a group are committed where they stand. Records
//! inside a `Begin`/`Commit` group are released together at the commit, so
//! replay order matches the order in which changes became visible. A group
//! with no commit is dropped.

use crate::reader::LogReader;
use crate::record::{LogEntry, LogRecord};
use chaindb_core::Result;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Counters gathered while replaying
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStats {
    pub segments: usize,
    pub records: usize,
    pub puts: usize,
    pub deletes: usize,
    pub groups_committed: usize,
    /// Groups with no commit record; their data is not replayed
    pub groups_dropped: usize,
    pub checkpoints: usize,
    pub last_lsn: u64,
}

/// Committed data records in replay order, with the counters
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<LogRecord>,
    pub stats: LogStats,
}

/// Read every segment in `dir` and collect the committed data records
pub fn replay(dir: &Path) -> Result<Replay> {
    let mut reader = LogReader::open(dir)?;
    let mut out = Replay::default();
    out.stats.segments = reader.segment_count();

    let mut open_groups: HashMap<u64, Vec<LogRecord>> = HashMap::new();
    let mut current: Option<u64> = None;

    while let Some(record) = reader.next_record()? {
        let stats = &mut out.stats;
        stats.records += 1;
        stats.last_lsn = stats.last_lsn.max(record.lsn);

        match record.entry {
            LogEntry::Begin { txn } => {
                open_groups.insert(txn, Vec::new());
                current = Some(txn);
            }
            LogEntry::Commit { txn } => {
                if let Some(group) = open_groups.remove(&txn) {
                    stats.groups_committed += 1;
                    out.records.extend(group);
                }
                if current == Some(txn) {
                    current = None;
                }
            }
            LogEntry::Checkpoint { .. } => stats.checkpoints += 1,
            LogEntry::Put { .. } | LogEntry::Delete { .. } => {
                if matches!(record.entry, LogEntry::Put { .. }) {
                    stats.puts += 1;
                } else {
                    stats.deletes += 1;
                }
                match current.and_then(|txn| open_groups.get_mut(&txn)) {
                    Some(group) => group.push(record),
                    None => out.records.push(record),
                }
            }
        }
    }

    out.stats.groups_dropped = open_groups.len();
    if out.stats.groups_dropped > 0 {
        debug!(
            dropped = out.stats.groups_dropped,
            "dropped uncommitted log groups"
        );
    }
    Ok(out)
}
