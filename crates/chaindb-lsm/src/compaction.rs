//! Compaction - merging level 0 into level 1
//!
//! Level 0 holds one table per memtable flush, with overlapping key ranges.
//! Once enough of them accumulate they are merged, together with every
//! overlapping level 1 table, into new non-overlapping level 1 tables.
//! Level 1 is the bottom level, so tombstones are dropped on the way.

use crate::cache::BlockCache;
use crate::manifest::Manifest;
use crate::sstable::{delete_sstable, SSTableEntry, SSTableMeta, SSTableReader, SSTableWriter};
use chaindb_core::Result;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Compaction configuration
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Number of level 0 tables that triggers a compaction
    pub level0_trigger: usize,
    /// Target file size for output SSTables
    pub target_file_size: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            level0_trigger: 4,
            target_file_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Statistics for compaction
#[derive(Debug, Clone, Default)]
pub struct CompactionStats {
    /// Total bytes read during compaction
    pub bytes_read: u64,
    /// Total bytes written during compaction
    pub bytes_written: u64,
    /// Number of compactions performed
    pub compaction_count: u64,
    /// Number of entries removed (tombstones + overwritten)
    pub entries_removed: u64,
}

/// Entry for merge iterator (with ordering)
#[derive(Debug)]
struct MergeEntry {
    entry: SSTableEntry,
    source_idx: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.entry.key == other.entry.key && self.source_idx == other.source_idx
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: smallest key first; for equal keys the higher source
        // index (newer table) comes out first
        match other.entry.key.cmp(&self.entry.key) {
            Ordering::Equal => self.source_idx.cmp(&other.source_idx),
            ord => ord,
        }
    }
}

/// Outcome of one compaction, for the store to install
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub inputs: Vec<u64>,
    pub outputs: Vec<SSTableMeta>,
}

/// Compaction worker
pub struct CompactionWorker {
    sst_dir: PathBuf,
    config: CompactionConfig,
    bits_per_key: usize,
    stats: CompactionStats,
}

impl CompactionWorker {
    /// Create a new compaction worker writing into `sst_dir`
    pub fn new(sst_dir: PathBuf, config: CompactionConfig, bits_per_key: usize) -> Self {
        Self {
            sst_dir,
            config,
            bits_per_key,
            stats: CompactionStats::default(),
        }
    }

    /// Check if compaction is needed for level 0
    pub fn needs_compaction(&self, manifest: &Manifest) -> bool {
        manifest.sstables_at_level(0).len() >= self.config.level0_trigger
    }

    /// Merge every level 0 table with the overlapping level 1 tables.
    ///
    /// The manifest is updated before input files are deleted. `open` must
    /// return the live reader for a table number.
    pub fn compact_level0<F>(
        &mut self,
        manifest: &mut Manifest,
        open: F,
    ) -> Result<Option<CompactionResult>>
    where
        F: Fn(u64) -> Result<Arc<SSTableReader>>,
    {
        let mut level0: Vec<_> = manifest.sstables_at_level(0).into_iter().cloned().collect();
        if level0.is_empty() {
            return Ok(None);
        }
        level0.sort_by_key(|s| s.number);

        let min_key = level0.iter().map(|s| s.min_key.clone()).min().unwrap_or_default();
        let max_key = level0.iter().map(|s| s.max_key.clone()).max().unwrap_or_default();

        let mut level1: Vec<_> = manifest
            .sstables_at_level(1)
            .into_iter()
            .filter(|s| s.max_key >= min_key && s.min_key <= max_key)
            .cloned()
            .collect();
        level1.sort_by(|a, b| a.min_key.cmp(&b.min_key));

        // Oldest first: level 1, then level 0 in flush order
        let inputs: Vec<u64> = level1
            .iter()
            .chain(level0.iter())
            .map(|s| s.number)
            .collect();

        let mut readers = Vec::with_capacity(inputs.len());
        for &number in &inputs {
            let reader = open(number)?;
            self.stats.bytes_read += reader.metadata().file_size;
            readers.push(reader);
        }

        let outputs = self.merge(&readers, manifest)?;
        manifest.record_compaction(inputs.clone(), &outputs)?;

        for &number in &inputs {
            if let Err(e) = delete_sstable(&self.sst_dir, number) {
                warn!(table = number, error = %e, "failed to delete compacted table");
            }
        }

        self.stats.compaction_count += 1;
        debug!(
            inputs = inputs.len(),
            outputs = outputs.len(),
            "compacted level 0"
        );

        Ok(Some(CompactionResult { inputs, outputs }))
    }

    /// Merge tables ordered oldest first into new level 1 tables
    fn merge(
        &mut self,
        readers: &[Arc<SSTableReader>],
        manifest: &mut Manifest,
    ) -> Result<Vec<SSTableMeta>> {
        let mut cursors: Vec<_> = readers.iter().map(|r| r.cursor()).collect();
        let mut heap: BinaryHeap<MergeEntry> = BinaryHeap::new();

        for (idx, cursor) in cursors.iter_mut().enumerate() {
            cursor.seek_to_first()?;
            if let Some(entry) = cursor.current() {
                heap.push(MergeEntry {
                    entry: entry.clone(),
                    source_idx: idx,
                });
            }
        }

        let mut outputs: Vec<SSTableMeta> = Vec::new();
        let mut current_writer: Option<SSTableWriter> = None;
        let mut last_key: Option<Vec<u8>> = None;

        while let Some(merge_entry) = heap.pop() {
            let source = merge_entry.source_idx;
            cursors[source].advance()?;
            if let Some(next) = cursors[source].current() {
                heap.push(MergeEntry {
                    entry: next.clone(),
                    source_idx: source,
                });
            }

            // Older versions of a key already written
            if last_key.as_ref() == Some(&merge_entry.entry.key) {
                self.stats.entries_removed += 1;
                continue;
            }
            last_key = Some(merge_entry.entry.key.clone());

            if merge_entry.entry.is_tombstone() {
                self.stats.entries_removed += 1;
                continue;
            }

            let full = current_writer
                .as_ref()
                .map(|w| w.estimated_size() >= self.config.target_file_size)
                .unwrap_or(false);
            if full {
                if let Some(writer) = current_writer.take() {
                    outputs.push(self.finish_output(writer)?);
                }
            }

            if current_writer.is_none() {
                current_writer = Some(SSTableWriter::new(
                    &self.sst_dir,
                    manifest.allocate_file_number(),
                    self.bits_per_key,
                )?);
            }
            if let Some(writer) = current_writer.as_mut() {
                writer.add(merge_entry.entry)?;
            }
        }

        if let Some(writer) = current_writer {
            outputs.push(self.finish_output(writer)?);
        }

        Ok(outputs)
    }

    fn finish_output(&mut self, writer: SSTableWriter) -> Result<SSTableMeta> {
        let mut meta = writer.finish()?;
        meta.level = 1;
        self.stats.bytes_written += meta.file_size;
        Ok(meta)
    }

    /// Get compaction statistics
    pub fn stats(&self) -> &CompactionStats {
        &self.stats
    }
}

/// Drop cached blocks of tables removed by a compaction
pub(crate) fn evict_inputs(cache: Option<&(Arc<BlockCache>, u64)>, inputs: &[u64]) {
    if let Some((cache, namespace)) = cache {
        for &number in inputs {
            cache.erase_table(*namespace, number);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::DEFAULT_BITS_PER_KEY;
    use std::path::Path;
    use tempfile::tempdir;

    fn table(dir: &Path, manifest: &mut Manifest, entries: Vec<SSTableEntry>) -> u64 {
        let number = manifest.allocate_file_number();
        let mut writer = SSTableWriter::new(dir, number, DEFAULT_BITS_PER_KEY).unwrap();
        for entry in entries {
            writer.add(entry).unwrap();
        }
        let meta = writer.finish().unwrap();
        manifest.add_sstable(&meta, number).unwrap();
        number
    }

    fn opener(dir: PathBuf) -> impl Fn(u64) -> Result<Arc<SSTableReader>> {
        move |n| SSTableReader::open(&dir, n).map(Arc::new)
    }

    #[test]
    fn test_merge_entry_ordering() {
        let a = MergeEntry {
            entry: SSTableEntry::value(b"a".to_vec(), b"1".to_vec()),
            source_idx: 0,
        };
        let b = MergeEntry {
            entry: SSTableEntry::value(b"b".to_vec(), b"2".to_vec()),
            source_idx: 0,
        };
        let a_newer = MergeEntry {
            entry: SSTableEntry::value(b"a".to_vec(), b"9".to_vec()),
            source_idx: 3,
        };

        assert!(a > b);
        assert!(a_newer > a);
    }

    #[test]
    fn test_needs_compaction() {
        let dir = tempdir().unwrap();
        let config = CompactionConfig {
            level0_trigger: 2,
            ..Default::default()
        };
        let worker = CompactionWorker::new(dir.path().to_path_buf(), config, DEFAULT_BITS_PER_KEY);
        let mut manifest = Manifest::open(dir.path()).unwrap();

        assert!(!worker.needs_compaction(&manifest));
        table(
            dir.path(),
            &mut manifest,
            vec![SSTableEntry::value(b"a".to_vec(), b"1".to_vec())],
        );
        table(
            dir.path(),
            &mut manifest,
            vec![SSTableEntry::value(b"b".to_vec(), b"1".to_vec())],
        );
        assert!(worker.needs_compaction(&manifest));
    }

    #[test]
    fn test_newest_version_wins() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::open(dir.path()).unwrap();

        table(
            dir.path(),
            &mut manifest,
            vec![
                SSTableEntry::value(b"a".to_vec(), b"1".to_vec()),
                SSTableEntry::value(b"c".to_vec(), b"3".to_vec()),
                SSTableEntry::value(b"d".to_vec(), b"4".to_vec()),
            ],
        );
        table(
            dir.path(),
            &mut manifest,
            vec![
                SSTableEntry::value(b"b".to_vec(), b"2".to_vec()),
                SSTableEntry::value(b"c".to_vec(), b"3-new".to_vec()),
                SSTableEntry::tombstone(b"d".to_vec()),
            ],
        );

        let mut worker = CompactionWorker::new(
            dir.path().to_path_buf(),
            CompactionConfig::default(),
            DEFAULT_BITS_PER_KEY,
        );
        let result = worker
            .compact_level0(&mut manifest, opener(dir.path().to_path_buf()))
            .unwrap()
            .unwrap();

        assert_eq!(result.inputs, vec![1, 2]);
        assert_eq!(result.outputs.len(), 1);
        assert!(manifest.sstables_at_level(0).is_empty());
        assert!(!dir.path().join("000001.sst").exists());

        let reader = SSTableReader::open(dir.path(), result.outputs[0].number).unwrap();
        assert_eq!(reader.get(b"a").unwrap().unwrap().value, b"1".to_vec());
        assert_eq!(reader.get(b"b").unwrap().unwrap().value, b"2".to_vec());
        assert_eq!(reader.get(b"c").unwrap().unwrap().value, b"3-new".to_vec());
        assert!(reader.get(b"d").unwrap().is_none());
        assert_eq!(worker.stats().entries_removed, 3);
    }

    #[test]
    fn test_level1_is_older_than_level0() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::open(dir.path()).unwrap();
        let mut worker = CompactionWorker::new(
            dir.path().to_path_buf(),
            CompactionConfig::default(),
            DEFAULT_BITS_PER_KEY,
        );

        table(
            dir.path(),
            &mut manifest,
            vec![SSTableEntry::value(b"k".to_vec(), b"old".to_vec())],
        );
        worker
            .compact_level0(&mut manifest, opener(dir.path().to_path_buf()))
            .unwrap();
        assert_eq!(manifest.sstables_at_level(1).len(), 1);

        table(
            dir.path(),
            &mut manifest,
            vec![SSTableEntry::value(b"k".to_vec(), b"new".to_vec())],
        );
        let result = worker
            .compact_level0(&mut manifest, opener(dir.path().to_path_buf()))
            .unwrap()
            .unwrap();

        let reader = SSTableReader::open(dir.path(), result.outputs[0].number).unwrap();
        assert_eq!(reader.get(b"k").unwrap().unwrap().value, b"new".to_vec());
        assert_eq!(manifest.sstables_at_level(1).len(), 1);
    }
}
