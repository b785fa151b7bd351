//! # chaindb LSM engine
//!
//! Log-structured merge storage used for the node's LSM instances
//! (`txleveldb` by default). One [`LsmStore`] owns one directory:
//!
//! ```text
//! <instance>/
//!   wal/        write-ahead log segments
//!   sst/        immutable sorted tables, `000001.sst` ...
//!   MANIFEST    live tables and the log position they cover
//! ```
//!
//! - **Memtable**: in-memory write buffer, sorted
//! - **SSTable**: immutable on-disk tables with a bloom filter per table
//! - **Block cache**: LRU cache of decoded blocks, shareable between stores
//! - **Compaction**: merges level 0 into a non-overlapping level 1
//! - **Manifest**: replayable record of the live table set
//!
//! ## Architecture
//!
//! ```text
//! WriteBatch → WAL → Memtable ──flush──▶ L0 tables ──compact──▶ L1 tables
//! ```
//!
//! Every write goes through a [`WriteBatch`] that is logged as one
//! transaction group, so a batch is either fully recovered or not at all.

use chaindb_core::{Error, Result};
use chaindb_wal::{LogEntry, LogRecord, SyncMode, Wal, WalOptions};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod batch;
pub mod bloom;
pub mod cache;
pub mod compaction;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod sstable;

pub use batch::{BatchLookup, BatchOperation, OperationKind, WriteBatch};
pub use bloom::DEFAULT_BITS_PER_KEY;
pub use cache::{BlockCache, CacheStats};
pub use compaction::{CompactionConfig, CompactionStats, CompactionWorker};
pub use iterator::LsmIterator;
pub use manifest::{Manifest, ManifestSSTable};
pub use memtable::Memtable;
pub use sstable::{SSTableEntry, SSTableMeta, SSTableReader, SSTableWriter};

/// Default memtable flush threshold (4MB)
const DEFAULT_MEMTABLE_SIZE: u64 = 4 * 1024 * 1024;

/// File id stamped on this engine's log records
const LSM_FILE_ID: u64 = 0;

const WAL_DIR: &str = "wal";
const SST_DIR: &str = "sst";

/// LSM store configuration
#[derive(Debug, Clone)]
pub struct LsmOptions {
    /// Maximum memtable size before flushing
    pub memtable_size: u64,
    /// Sync mode for the WAL
    pub sync_mode: SyncMode,
    /// Compaction configuration
    pub compaction: CompactionConfig,
    /// Compact level 0 automatically after a flush
    pub enable_compaction: bool,
    /// Create the directory when it does not exist
    pub create_if_missing: bool,
    /// Bloom filter density for new tables
    pub bloom_bits_per_key: usize,
    /// Block cache, possibly shared with other stores
    pub block_cache: Option<Arc<BlockCache>>,
}

impl Default for LsmOptions {
    fn default() -> Self {
        Self {
            memtable_size: DEFAULT_MEMTABLE_SIZE,
            sync_mode: SyncMode::Sync,
            compaction: CompactionConfig::default(),
            enable_compaction: true,
            create_if_missing: true,
            bloom_bits_per_key: DEFAULT_BITS_PER_KEY,
            block_cache: None,
        }
    }
}

/// Live tables: level 0 newest first, level 1 ordered by smallest key
#[derive(Clone, Default)]
struct TableSet {
    level0: Vec<Arc<SSTableReader>>,
    level1: Vec<Arc<SSTableReader>>,
}

impl TableSet {
    fn find(&self, number: u64) -> Option<Arc<SSTableReader>> {
        self.level0
            .iter()
            .chain(self.level1.iter())
            .find(|t| t.number() == number)
            .cloned()
    }

    fn all(&self) -> impl Iterator<Item = &Arc<SSTableReader>> {
        self.level0.iter().chain(self.level1.iter())
    }

    fn sort(&mut self) {
        self.level0.sort_by(|a, b| b.number().cmp(&a.number()));
        self.level1
            .sort_by(|a, b| a.metadata().min_key.cmp(&b.metadata().min_key));
    }
}

/// Memtable waiting to become a table, with the log position it ends before
struct Immutable {
    table: Arc<Memtable>,
    boundary: u64,
}

/// Persistent key/value store with an LSM layout
///
/// Lock order: flush lock, wal, memtable, immutable, compactor, manifest,
/// tables.
pub struct LsmStore {
    dir: PathBuf,
    sst_dir: PathBuf,
    options: LsmOptions,
    flush_lock: Mutex<()>,
    wal: Mutex<Wal>,
    memtable: RwLock<Arc<Memtable>>,
    immutable: RwLock<Option<Immutable>>,
    compactor: Mutex<CompactionWorker>,
    manifest: Mutex<Manifest>,
    tables: RwLock<Arc<TableSet>>,
    cache: Option<(Arc<BlockCache>, u64)>,
    next_tx: AtomicU64,
}

impl LsmStore {
    /// Open or create a store at the given path with default options
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, LsmOptions::default())
    }

    /// Open or create a store with custom options
    pub fn open_with_options(path: impl AsRef<Path>, options: LsmOptions) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();
        if !dir.exists() && !options.create_if_missing {
            return Err(Error::Backend(format!(
                "LSM store {} does not exist",
                dir.display()
            )));
        }
        let sst_dir = dir.join(SST_DIR);
        fs::create_dir_all(dir.join(WAL_DIR))?;
        fs::create_dir_all(&sst_dir)?;

        let manifest = Manifest::open(&dir)?;

        let cache = options
            .block_cache
            .as_ref()
            .map(|c| (Arc::clone(c), c.new_namespace()));

        let mut tables = TableSet::default();
        let mut live = HashSet::new();
        for sst in manifest.all_sstables() {
            let reader = Arc::new(open_reader(&sst_dir, sst.number, cache.as_ref())?);
            live.insert(sst.number);
            match sst.level {
                0 => tables.level0.push(reader),
                _ => tables.level1.push(reader),
            }
        }
        tables.sort();
        remove_orphans(&sst_dir, &live)?;

        let wal =
            Wal::open(WalOptions::new(dir.join(WAL_DIR)).with_sync_mode(options.sync_mode))?;

        // Replay what the tables do not already hold
        let covered = manifest.log_lsn();
        let mut memtable = Memtable::new();
        let mut replayed = 0usize;
        for record in wal.replay()?.records {
            if record.lsn <= covered {
                continue;
            }
            match record.entry {
                LogEntry::Put { key, value, .. } => memtable.put(key, value),
                LogEntry::Delete { key, .. } => memtable.delete(key),
                _ => continue,
            }
            replayed += 1;
        }

        info!(
            path = %dir.display(),
            tables = live.len(),
            replayed,
            "opened LSM store"
        );

        let compactor = CompactionWorker::new(
            sst_dir.clone(),
            options.compaction.clone(),
            options.bloom_bits_per_key,
        );
        let next_tx = wal.last_lsn() + 1;

        Ok(Self {
            dir,
            sst_dir,
            options,
            flush_lock: Mutex::new(()),
            wal: Mutex::new(wal),
            memtable: RwLock::new(Arc::new(memtable)),
            immutable: RwLock::new(None),
            compactor: Mutex::new(compactor),
            manifest: Mutex::new(manifest),
            tables: RwLock::new(Arc::new(tables)),
            cache,
            next_tx: AtomicU64::new(next_tx),
        })
    }

    /// Directory this store lives in
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Delete a closed store's directory
    pub fn destroy(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    /// Retrieve a value by key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        {
            let memtable = self.memtable.read();
            if let Some(result) = memtable.get(key) {
                return Ok(result.map(|v| v.to_vec()));
            }
        }

        {
            let immutable = self.immutable.read();
            if let Some(pending) = immutable.as_ref() {
                if let Some(result) = pending.table.get(key) {
                    return Ok(result.map(|v| v.to_vec()));
                }
            }
        }

        let tables = Arc::clone(&*self.tables.read());
        for table in tables.all() {
            if let Some(entry) = table.get(key)? {
                if entry.is_tombstone() {
                    return Ok(None);
                }
                return Ok(Some(entry.value));
            }
        }

        Ok(None)
    }

    /// Insert or update a key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(&batch)
    }

    /// Delete a key
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(&batch)
    }

    /// Apply a batch atomically.
    ///
    /// The batch is logged as one transaction group before any of it
    /// becomes visible, and becomes visible all at once.
    ///
    /// An iterator keeps the memtable it was created on. The first write
    /// after that copies the whole memtable, up to `memtable_size` bytes;
    /// later writes go to the copy until the next iterator is created.
    /// Interleaving one iterator per write therefore costs a copy per write.
    pub fn write(&self, batch: &WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let tx_id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        let mut records = Vec::with_capacity(batch.len() + 2);
        records.push(LogRecord::begin(tx_id));
        for op in batch.operations() {
            records.push(match &op.kind {
                OperationKind::Put { value } => {
                    LogRecord::put(LSM_FILE_ID, op.key.clone(), value.clone())
                }
                OperationKind::Delete => LogRecord::delete(LSM_FILE_ID, op.key.clone()),
            });
        }
        records.push(LogRecord::commit(tx_id));

        let should_flush = {
            let mut wal = self.wal.lock();
            wal.append_all(records)?;

            let mut memtable = self.memtable.write();
            // Copies the table if an iterator still holds it
            let table = Arc::make_mut(&mut *memtable);
            for op in batch.operations() {
                match &op.kind {
                    OperationKind::Put { value } => table.put(op.key.clone(), value.clone()),
                    OperationKind::Delete => table.delete(op.key.clone()),
                }
            }
            table.size_bytes() >= self.options.memtable_size
        };

        if should_flush {
            self.flush()?;
        }

        Ok(())
    }

    /// Iterator over a consistent view of the store, unpositioned
    pub fn new_iterator(&self) -> LsmIterator {
        let mut memtables = vec![Arc::clone(&*self.memtable.read())];
        if let Some(pending) = self.immutable.read().as_ref() {
            memtables.push(Arc::clone(&pending.table));
        }
        let tables = Arc::clone(&*self.tables.read());
        let cursors = tables.all().map(|t| t.cursor()).collect();
        LsmIterator::new(memtables, cursors)
    }

    /// Write the memtable out as a level 0 table.
    ///
    /// Log segments that only hold flushed records are deleted afterwards.
    pub fn flush(&self) -> Result<()> {
        let _flush = self.flush_lock.lock();

        // A table left over from a failed flush goes first
        if self.immutable.read().is_some() {
            self.write_immutable()?;
        }

        {
            let mut wal = self.wal.lock();
            let mut memtable = self.memtable.write();
            if memtable.is_empty() {
                return Ok(());
            }
            let boundary = wal.rotate()?;
            *self.immutable.write() = Some(Immutable {
                table: Arc::clone(&*memtable),
                boundary,
            });
            *memtable = Arc::new(Memtable::new());
        }

        self.write_immutable()?;

        if self.options.enable_compaction {
            self.maybe_compact()?;
        }

        Ok(())
    }

    fn write_immutable(&self) -> Result<()> {
        let (table, boundary) = match self.immutable.read().as_ref() {
            Some(pending) => (Arc::clone(&pending.table), pending.boundary),
            None => return Ok(()),
        };

        let number = self.manifest.lock().allocate_file_number();
        let meta = SSTableWriter::from_memtable(
            &self.sst_dir,
            number,
            self.options.bloom_bits_per_key,
            table.iter(),
        )?;
        let reader = Arc::new(open_reader(&self.sst_dir, number, self.cache.as_ref())?);

        {
            let mut manifest = self.manifest.lock();
            manifest.add_sstable(&meta, boundary.saturating_sub(1))?;
            let mut tables = self.tables.write();
            let mut set = TableSet::clone(&tables);
            set.level0.insert(0, reader);
            *tables = Arc::new(set);
        }
        *self.immutable.write() = None;

        let removed = self.wal.lock().remove_before(boundary)?;
        debug!(
            table = number,
            entries = meta.entry_count,
            segments_removed = removed,
            "flushed memtable"
        );
        Ok(())
    }

    /// Compact level 0 into level 1 regardless of the trigger
    pub fn compact(&self) -> Result<()> {
        let _flush = self.flush_lock.lock();
        let mut compactor = self.compactor.lock();
        let mut manifest = self.manifest.lock();
        self.run_compaction(&mut compactor, &mut manifest)
    }

    fn maybe_compact(&self) -> Result<()> {
        let mut compactor = self.compactor.lock();
        let mut manifest = self.manifest.lock();
        if compactor.needs_compaction(&manifest) {
            self.run_compaction(&mut compactor, &mut manifest)?;
        }
        Ok(())
    }

    fn run_compaction(
        &self,
        compactor: &mut CompactionWorker,
        manifest: &mut Manifest,
    ) -> Result<()> {
        let current = Arc::clone(&*self.tables.read());
        let result = compactor.compact_level0(manifest, |number| {
            current
                .find(number)
                .ok_or_else(|| Error::Corruption(format!("table {} is not live", number)))
        })?;

        let result = match result {
            Some(result) => result,
            None => return Ok(()),
        };

        let mut set = TableSet::clone(&current);
        set.level0.retain(|t| !result.inputs.contains(&t.number()));
        set.level1.retain(|t| !result.inputs.contains(&t.number()));
        for meta in &result.outputs {
            set.level1.push(Arc::new(open_reader(
                &self.sst_dir,
                meta.number,
                self.cache.as_ref(),
            )?));
        }
        set.sort();
        *self.tables.write() = Arc::new(set);

        compaction::evict_inputs(self.cache.as_ref(), &result.inputs);
        Ok(())
    }

    /// Force the WAL to disk
    pub fn sync(&self) -> Result<()> {
        self.wal.lock().sync()
    }

    /// Check every live table's blocks and checksums
    pub fn verify(&self) -> Result<()> {
        let tables = Arc::clone(&*self.tables.read());
        for table in tables.all() {
            table.verify()?;
        }

        let manifest = self.manifest.lock();
        for sst in manifest.all_sstables() {
            if tables.find(sst.number).is_none() {
                return Err(Error::Corruption(format!(
                    "manifest table {} is not loaded",
                    sst.number
                )));
            }
        }
        Ok(())
    }

    /// Flush, sync and compact the manifest; later writes fail
    pub fn close(&self) -> Result<()> {
        self.flush()?;
        self.wal.lock().close()?;
        self.manifest.lock().rewrite()?;
        info!(path = %self.dir.display(), "closed LSM store");
        Ok(())
    }

    /// Get storage statistics
    pub fn stats(&self) -> LsmStats {
        let (memtable_size, memtable_entries) = {
            let memtable = self.memtable.read();
            (memtable.size_bytes(), memtable.len())
        };
        let compaction_stats = self.compactor.lock().stats().clone();
        let manifest = self.manifest.lock();

        LsmStats {
            memtable_size,
            memtable_entries,
            sstable_count: manifest.all_sstables().len(),
            total_disk_size: manifest.total_size(),
            level_counts: manifest.level_counts(),
            compaction_stats,
            cache: self.cache.as_ref().map(|(c, _)| c.stats()),
        }
    }
}

impl Drop for LsmStore {
    fn drop(&mut self) {
        if let Err(e) = self.wal.get_mut().sync() {
            warn!(path = %self.dir.display(), error = %e, "failed to sync WAL on drop");
        }
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct LsmStats {
    /// Current memtable size in bytes
    pub memtable_size: u64,
    /// Number of entries in memtable
    pub memtable_entries: usize,
    /// Total number of SSTables
    pub sstable_count: usize,
    /// Total disk size of SSTables
    pub total_disk_size: u64,
    /// Number of SSTables at each level
    pub level_counts: Vec<usize>,
    /// Compaction statistics
    pub compaction_stats: CompactionStats,
    /// Block cache usage, when a cache is configured
    pub cache: Option<CacheStats>,
}

fn open_reader(
    sst_dir: &Path,
    number: u64,
    cache: Option<&(Arc<BlockCache>, u64)>,
) -> Result<SSTableReader> {
    let reader = SSTableReader::open(sst_dir, number)?;
    Ok(match cache {
        Some((cache, namespace)) => reader.with_cache(Arc::clone(cache), *namespace),
        None => reader,
    })
}

/// Delete tables a crash left behind before they reached the manifest
fn remove_orphans(sst_dir: &Path, live: &HashSet<u64>) -> Result<()> {
    for entry in fs::read_dir(sst_dir)? {
        let path = entry?.path();
        let number = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".sst"))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(number) = number {
            if !live.contains(&number) {
                warn!(table = number, "removing table missing from manifest");
                fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}
