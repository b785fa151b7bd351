//! The list of live tables and the log position they cover
//!
//! The manifest tracks which SSTables are live, their levels, the next file
//! number and the WAL position already captured by those tables.
//!
//! On disk it is a sequence of length-prefixed, CRC-protected records: a
//! snapshot followed by incremental edits. Loading replays every edit after
//! the snapshot and ignores a torn final record. Rewrites go to a temporary
//! file that is renamed over the old manifest.

use crate::sstable::SSTableMeta;
use chaindb_core::format_version::{manifest_version, MANIFEST_FORMAT_VERSION};
use chaindb_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Manifest file name
const MANIFEST_FILE: &str = "MANIFEST";
/// Temporary name used while rewriting
const MANIFEST_TMP: &str = "MANIFEST.tmp";
/// Incremental edits before the manifest is compacted into a new snapshot
const LOG_THRESHOLD: usize = 100;

/// Record type for manifest log entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ManifestRecord {
    /// Complete state; always the first record
    Snapshot(ManifestSnapshot),
    /// A memtable flush produced a table holding every WAL record up to `log_lsn`
    AddSSTable {
        table: ManifestSSTable,
        log_lsn: u64,
    },
    /// Remove an SSTable
    RemoveSSTable { number: u64 },
    /// Compaction replaced `inputs` with `outputs`
    CompactionDone {
        inputs: Vec<u64>,
        outputs: Vec<ManifestSSTable>,
    },
}

/// SSTable entry in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSSTable {
    pub level: u32,
    pub number: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub entry_count: u64,
    pub file_size: u64,
}

impl ManifestSSTable {
    pub fn to_meta(&self) -> SSTableMeta {
        SSTableMeta {
            number: self.number,
            min_key: self.min_key.clone(),
            max_key: self.max_key.clone(),
            entry_count: self.entry_count,
            file_size: self.file_size,
            level: self.level,
        }
    }
}

impl From<&SSTableMeta> for ManifestSSTable {
    fn from(meta: &SSTableMeta) -> Self {
        Self {
            level: meta.level,
            number: meta.number,
            min_key: meta.min_key.clone(),
            max_key: meta.max_key.clone(),
            entry_count: meta.entry_count,
            file_size: meta.file_size,
        }
    }
}

/// Manifest snapshot (complete state)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSnapshot {
    pub version: u16,
    pub next_file_number: u64,
    /// Highest WAL LSN whose effects are contained in the live tables
    pub log_lsn: u64,
    pub sstables: Vec<ManifestSSTable>,
}

impl Default for ManifestSnapshot {
    fn default() -> Self {
        Self {
            version: MANIFEST_FORMAT_VERSION,
            next_file_number: 1,
            log_lsn: 0,
            sstables: Vec::new(),
        }
    }
}

impl ManifestSnapshot {
    fn apply(&mut self, record: ManifestRecord) {
        match record {
            ManifestRecord::Snapshot(snapshot) => *self = snapshot,
            ManifestRecord::AddSSTable { table, log_lsn } => {
                self.next_file_number = self.next_file_number.max(table.number + 1);
                self.log_lsn = self.log_lsn.max(log_lsn);
                self.sstables.push(table);
            }
            ManifestRecord::RemoveSSTable { number } => {
                self.sstables.retain(|s| s.number != number);
            }
            ManifestRecord::CompactionDone { inputs, outputs } => {
                self.sstables.retain(|s| !inputs.contains(&s.number));
                for table in outputs {
                    self.next_file_number = self.next_file_number.max(table.number + 1);
                    self.sstables.push(table);
                }
            }
        }
    }
}

fn encode_record(record: &ManifestRecord) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record)?;
    let mut buf = Vec::with_capacity(payload.len() + 8);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(buf)
}

/// Decode records until the data ends or a record is damaged.
fn decode_records(data: &[u8]) -> Vec<ManifestRecord> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset + 4 <= data.len() {
        let len = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        let end = offset + 4 + len + 4;
        if end > data.len() {
            break;
        }
        let payload = &data[offset + 4..offset + 4 + len];
        let crc = u32::from_le_bytes([
            data[end - 4],
            data[end - 3],
            data[end - 2],
            data[end - 1],
        ]);
        if crc != crc32fast::hash(payload) {
            break;
        }
        match bincode::deserialize::<ManifestRecord>(payload) {
            Ok(record) => records.push(record),
            Err(_) => break,
        }
        offset = end;
    }

    if offset < data.len() {
        warn!(
            trailing_bytes = data.len() - offset,
            "manifest ends in a damaged record"
        );
    }

    records
}

/// Manifest manager - tracks database state
pub struct Manifest {
    dir: PathBuf,
    snapshot: ManifestSnapshot,
    log_writer: BufWriter<File>,
    log_entries: usize,
}

impl Manifest {
    /// Open or create a manifest in the given directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let snapshot = if manifest_path.exists() {
            Self::load(&manifest_path)?
        } else {
            ManifestSnapshot::default()
        };

        // Start from a compact file so a torn tail is never appended to
        let log_writer = Self::write_snapshot(&dir, &snapshot)?;

        Ok(Self {
            dir,
            snapshot,
            log_writer,
            log_entries: 0,
        })
    }

    fn load(path: &Path) -> Result<ManifestSnapshot> {
        let data = fs::read(path)?;
        let mut records = decode_records(&data).into_iter();

        let mut snapshot = match records.next() {
            Some(ManifestRecord::Snapshot(snapshot)) => snapshot,
            Some(_) => {
                return Err(Error::Corruption(
                    "manifest does not start with a snapshot".into(),
                ))
            }
            None if data.is_empty() => return Ok(ManifestSnapshot::default()),
            None => return Err(Error::Corruption("manifest snapshot unreadable".into())),
        };

        if !manifest_version().can_read(snapshot.version) {
            return Err(Error::Corruption(format!(
                "Unsupported manifest format version {}",
                snapshot.version
            )));
        }

        let mut edits = 0;
        for record in records {
            snapshot.apply(record);
            edits += 1;
        }
        debug!(edits, tables = snapshot.sstables.len(), "loaded manifest");

        Ok(snapshot)
    }

    /// Write `snapshot` to a temporary file and move it into place
    fn write_snapshot(dir: &Path, snapshot: &ManifestSnapshot) -> Result<BufWriter<File>> {
        let tmp_path = dir.join(MANIFEST_TMP);
        let manifest_path = dir.join(MANIFEST_FILE);

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&encode_record(&ManifestRecord::Snapshot(snapshot.clone()))?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &manifest_path)?;

        let file = OpenOptions::new().append(true).open(&manifest_path)?;
        Ok(BufWriter::new(file))
    }

    fn write_record(&mut self, record: ManifestRecord) -> Result<()> {
        self.log_writer.write_all(&encode_record(&record)?)?;
        self.log_writer.flush()?;
        self.log_writer.get_ref().sync_all()?;

        self.snapshot.apply(record);
        self.log_entries += 1;

        if self.log_entries >= LOG_THRESHOLD {
            self.rewrite()?;
        }

        Ok(())
    }

    /// Rewrite the manifest as a fresh snapshot
    pub fn rewrite(&mut self) -> Result<()> {
        self.log_writer = Self::write_snapshot(&self.dir, &self.snapshot)?;
        self.log_entries = 0;
        Ok(())
    }

    /// Hand out a number for a new table file
    pub fn allocate_file_number(&mut self) -> u64 {
        let number = self.snapshot.next_file_number;
        self.snapshot.next_file_number += 1;
        number
    }

    /// Record a flushed table holding every WAL record up to `log_lsn`
    pub fn add_sstable(&mut self, meta: &SSTableMeta, log_lsn: u64) -> Result<()> {
        self.write_record(ManifestRecord::AddSSTable {
            table: meta.into(),
            log_lsn,
        })
    }

    /// Remove an SSTable from the manifest
    pub fn remove_sstable(&mut self, number: u64) -> Result<()> {
        self.write_record(ManifestRecord::RemoveSSTable { number })
    }

    /// Record a compaction completion
    pub fn record_compaction(&mut self, inputs: Vec<u64>, outputs: &[SSTableMeta]) -> Result<()> {
        self.write_record(ManifestRecord::CompactionDone {
            inputs,
            outputs: outputs.iter().map(ManifestSSTable::from).collect(),
        })
    }

    /// Highest WAL LSN captured by the live tables
    pub fn log_lsn(&self) -> u64 {
        self.snapshot.log_lsn
    }

    /// Get all SSTables at a given level
    pub fn sstables_at_level(&self, level: u32) -> Vec<&ManifestSSTable> {
        self.snapshot
            .sstables
            .iter()
            .filter(|s| s.level == level)
            .collect()
    }

    /// Get all SSTables
    pub fn all_sstables(&self) -> &[ManifestSSTable] {
        &self.snapshot.sstables
    }

    /// Get the number of SSTables at each level
    pub fn level_counts(&self) -> Vec<usize> {
        let max_level = self
            .snapshot
            .sstables
            .iter()
            .map(|s| s.level)
            .max()
            .unwrap_or(0);

        let mut counts = vec![0usize; (max_level + 1) as usize];
        for sst in &self.snapshot.sstables {
            counts[sst.level as usize] += 1;
        }

        counts
    }

    /// Get total size of all SSTables
    pub fn total_size(&self) -> u64 {
        self.snapshot.sstables.iter().map(|s| s.file_size).sum()
    }
}
