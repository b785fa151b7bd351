//! SSTable - Sorted String Table format and I/O
//!
//! SSTables are immutable on-disk files that store key-value pairs in sorted order.
//!
//! ## File Format
//!
//! ```text
//! +------------------+
//! | Data Blocks      |  <- length-prefixed entries, CRC32 per block
//! +------------------+
//! | Filter Block     |  <- bloom filter over every key
//! +------------------+
//! | Index Block      |  <- first key + offset of every data block
//! +------------------+
//! | Footer           |  <- offsets, key range, magic, version, CRC
//! +------------------+
//! | Footer length    |  <- u32 LE
//! +------------------+
//! ```

use crate::bloom::{BloomBuilder, BloomFilter};
use crate::cache::{Block, BlockCache, BlockKey};
use crate::memtable::Slot;
use chaindb_core::format_version::{magic, sstable_version, SSTABLE_FORMAT_VERSION};
use chaindb_core::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default block size (4KB)
const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Entry type tags
const ENTRY_TYPE_VALUE: u8 = 0;
const ENTRY_TYPE_TOMBSTONE: u8 = 1;

/// File name of the table with the given number
pub fn table_file_name(number: u64) -> String {
    format!("{:06}.sst", number)
}

/// A single entry in an SSTable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SSTableEntry {
    /// The key
    pub key: Vec<u8>,
    /// Entry type: 0 = value, 1 = tombstone
    pub entry_type: u8,
    /// The value (empty for tombstones)
    pub value: Vec<u8>,
}

impl SSTableEntry {
    /// Create a value entry
    pub fn value(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            entry_type: ENTRY_TYPE_VALUE,
            value,
        }
    }

    /// Create a tombstone entry
    pub fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            entry_type: ENTRY_TYPE_TOMBSTONE,
            value: Vec::new(),
        }
    }

    /// Check if this is a tombstone
    pub fn is_tombstone(&self) -> bool {
        self.entry_type == ENTRY_TYPE_TOMBSTONE
    }
}

/// Index entry pointing to a data block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// First key in the block
    pub first_key: Vec<u8>,
    /// Offset of the block in the file
    pub offset: u64,
    /// Size of the block in bytes, CRC included
    pub size: u32,
}

/// SSTable footer containing metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SSTableFooter {
    pub filter_offset: u64,
    pub filter_size: u32,
    pub index_offset: u64,
    pub index_size: u32,
    pub entry_count: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub magic: u32,
    pub version: u16,
    /// CRC32 of the footer encoded with this field zeroed
    pub crc: u32,
}

impl SSTableFooter {
    fn checksum(&self) -> Result<u32> {
        let unsigned = SSTableFooter {
            crc: 0,
            ..self.clone()
        };
        Ok(crc32fast::hash(&bincode::serialize(&unsigned)?))
    }
}

/// SSTable metadata (in-memory representation)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableMeta {
    /// File number; higher numbers are newer
    pub number: u64,
    /// Minimum key
    pub min_key: Vec<u8>,
    /// Maximum key
    pub max_key: Vec<u8>,
    /// Number of entries
    pub entry_count: u64,
    /// File size in bytes
    pub file_size: u64,
    /// Level in the LSM tree (0 = newest)
    pub level: u32,
}

/// SSTable writer - creates new SSTable files
pub struct SSTableWriter {
    number: u64,
    writer: BufWriter<File>,
    position: u64,
    index: Vec<IndexEntry>,
    block_buffer: Vec<u8>,
    block_size: usize,
    current_block_first_key: Option<Vec<u8>>,
    entry_count: u64,
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
    filter: BloomBuilder,
    bits_per_key: usize,
}

impl SSTableWriter {
    /// Create a writer for table `number` inside `dir`
    pub fn new(dir: &Path, number: u64, bits_per_key: usize) -> Result<Self> {
        Self::with_block_size(dir, number, bits_per_key, DEFAULT_BLOCK_SIZE)
    }

    /// Create a new SSTable writer with custom block size
    pub fn with_block_size(
        dir: &Path,
        number: u64,
        bits_per_key: usize,
        block_size: usize,
    ) -> Result<Self> {
        let file = File::create(dir.join(table_file_name(number)))?;

        Ok(Self {
            number,
            writer: BufWriter::new(file),
            position: 0,
            index: Vec::new(),
            block_buffer: Vec::with_capacity(block_size),
            block_size,
            current_block_first_key: None,
            entry_count: 0,
            min_key: None,
            max_key: None,
            filter: BloomBuilder::new(),
            bits_per_key,
        })
    }

    /// Add an entry. Keys must arrive in strictly ascending order.
    pub fn add(&mut self, entry: SSTableEntry) -> Result<()> {
        if let Some(last) = &self.max_key {
            if entry.key <= *last {
                return Err(Error::InvalidInput(
                    "SSTable keys must be added in ascending order".into(),
                ));
            }
        }

        if self.min_key.is_none() {
            self.min_key = Some(entry.key.clone());
        }
        self.max_key = Some(entry.key.clone());

        if self.current_block_first_key.is_none() {
            self.current_block_first_key = Some(entry.key.clone());
        }
        self.filter.add_key(&entry.key);

        let encoded = bincode::serialize(&entry)?;
        self.block_buffer
            .extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        self.block_buffer.extend_from_slice(&encoded);

        self.entry_count += 1;

        if self.block_buffer.len() >= self.block_size {
            self.flush_block()?;
        }

        Ok(())
    }

    /// Approximate number of bytes written so far
    pub fn estimated_size(&self) -> u64 {
        self.position + self.block_buffer.len() as u64
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block_buffer.is_empty() {
            return Ok(());
        }

        let crc = crc32fast::hash(&self.block_buffer);

        if let Some(first_key) = self.current_block_first_key.take() {
            self.index.push(IndexEntry {
                first_key,
                offset: self.position,
                size: self.block_buffer.len() as u32 + 4,
            });
        }

        self.writer.write_all(&self.block_buffer)?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.position += self.block_buffer.len() as u64 + 4;

        self.block_buffer.clear();

        Ok(())
    }

    /// Finish writing, sync the file and return its metadata
    pub fn finish(mut self) -> Result<SSTableMeta> {
        self.flush_block()?;

        let filter_offset = self.position;
        let filter = self.filter.finish(self.bits_per_key);
        self.writer.write_all(&filter)?;
        self.position += filter.len() as u64;

        let index_offset = self.position;
        let index_encoded = bincode::serialize(&self.index)?;
        self.writer.write_all(&index_encoded)?;
        self.position += index_encoded.len() as u64;

        let mut footer = SSTableFooter {
            filter_offset,
            filter_size: filter.len() as u32,
            index_offset,
            index_size: index_encoded.len() as u32,
            entry_count: self.entry_count,
            min_key: self.min_key.clone().unwrap_or_default(),
            max_key: self.max_key.clone().unwrap_or_default(),
            magic: magic::SSTABLE,
            version: SSTABLE_FORMAT_VERSION,
            crc: 0,
        };
        footer.crc = footer.checksum()?;

        let footer_encoded = bincode::serialize(&footer)?;
        self.writer.write_all(&footer_encoded)?;
        self.writer
            .write_all(&(footer_encoded.len() as u32).to_le_bytes())?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(SSTableMeta {
            number: self.number,
            min_key: footer.min_key,
            max_key: footer.max_key,
            entry_count: self.entry_count,
            file_size: self.position + footer_encoded.len() as u64 + 4,
            level: 0,
        })
    }

    /// Build an SSTable from memtable entries
    pub fn from_memtable<'a, I>(
        dir: &Path,
        number: u64,
        bits_per_key: usize,
        iter: I,
    ) -> Result<SSTableMeta>
    where
        I: Iterator<Item = Slot<'a>>,
    {
        let mut writer = SSTableWriter::new(dir, number, bits_per_key)?;
        for (key, value) in iter {
            writer.add(match value {
                Some(value) => SSTableEntry::value(key.to_vec(), value.to_vec()),
                None => SSTableEntry::tombstone(key.to_vec()),
            })?;
        }

        writer.finish()
    }
}

/// SSTable reader - reads from an existing SSTable file
///
/// Shared behind an `Arc` by the store, iterators and compaction; block
/// reads go through an internal file lock.
pub struct SSTableReader {
    path: PathBuf,
    number: u64,
    file: Mutex<File>,
    index: Vec<IndexEntry>,
    footer: SSTableFooter,
    filter: BloomFilter,
    file_size: u64,
    cache: Option<(Arc<BlockCache>, u64)>,
}

impl SSTableReader {
    /// Open table `number` inside `dir`
    pub fn open(dir: &Path, number: u64) -> Result<Self> {
        Self::open_path(dir.join(table_file_name(number)), number)
    }

    fn open_path(path: PathBuf, number: u64) -> Result<Self> {
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        if file_size < 4 {
            return Err(Error::Corruption(format!(
                "SSTable {} too small",
                path.display()
            )));
        }

        file.seek(SeekFrom::End(-4))?;
        let mut footer_len_buf = [0u8; 4];
        file.read_exact(&mut footer_len_buf)?;
        let footer_len = u32::from_le_bytes(footer_len_buf) as u64;
        if footer_len + 4 > file_size {
            return Err(Error::Corruption(format!(
                "SSTable {} footer length out of range",
                path.display()
            )));
        }

        file.seek(SeekFrom::Start(file_size - 4 - footer_len))?;
        let mut footer_buf = vec![0u8; footer_len as usize];
        file.read_exact(&mut footer_buf)?;

        let footer: SSTableFooter = bincode::deserialize(&footer_buf)
            .map_err(|e| Error::Corruption(format!("unreadable SSTable footer: {}", e)))?;

        if footer.magic != magic::SSTABLE {
            return Err(Error::Corruption("Invalid SSTable magic number".into()));
        }
        if !sstable_version().can_read(footer.version) {
            return Err(Error::Corruption(format!(
                "Unsupported SSTable format version {}",
                footer.version
            )));
        }
        if footer.checksum()? != footer.crc {
            return Err(Error::Corruption("SSTable footer CRC mismatch".into()));
        }

        let mut filter_buf = vec![0u8; footer.filter_size as usize];
        file.seek(SeekFrom::Start(footer.filter_offset))?;
        file.read_exact(&mut filter_buf)?;

        file.seek(SeekFrom::Start(footer.index_offset))?;
        let mut index_buf = vec![0u8; footer.index_size as usize];
        file.read_exact(&mut index_buf)?;

        let index: Vec<IndexEntry> = bincode::deserialize(&index_buf)
            .map_err(|e| Error::Corruption(format!("unreadable SSTable index: {}", e)))?;

        Ok(Self {
            path,
            number,
            file: Mutex::new(file),
            index,
            footer,
            filter: BloomFilter::from_bytes(filter_buf),
            file_size,
            cache: None,
        })
    }

    /// Serve block reads through a shared cache
    pub fn with_cache(mut self, cache: Arc<BlockCache>, namespace: u64) -> Self {
        self.cache = Some((cache, namespace));
        self
    }

    /// Get an entry (value or tombstone) by key
    pub fn get(&self, key: &[u8]) -> Result<Option<SSTableEntry>> {
        if !self.might_contain(key) || !self.filter.may_contain(key) {
            return Ok(None);
        }

        let block_idx = match self.block_for(key) {
            Some(idx) => idx,
            None => return Ok(None),
        };

        let block = self.read_block(block_idx)?;
        Ok(block
            .binary_search_by(|entry| entry.key.as_slice().cmp(key))
            .ok()
            .map(|pos| block[pos].clone()))
    }

    /// Index of the block whose range may hold `key`
    fn block_for(&self, key: &[u8]) -> Option<usize> {
        let after = self
            .index
            .partition_point(|entry| entry.first_key.as_slice() <= key);
        if after == 0 {
            None
        } else {
            Some(after - 1)
        }
    }

    /// Read a data block by index, consulting the cache first
    fn read_block(&self, block_idx: usize) -> Result<Block> {
        let index_entry = &self.index[block_idx];
        let cache_key = self.cache.as_ref().map(|(_, namespace)| BlockKey {
            namespace: *namespace,
            table: self.number,
            offset: index_entry.offset,
        });

        if let (Some((cache, _)), Some(key)) = (&self.cache, &cache_key) {
            if let Some(block) = cache.get(key) {
                return Ok(block);
            }
        }

        let block = Arc::new(self.load_block(index_entry)?);

        if let (Some((cache, _)), Some(key)) = (&self.cache, cache_key) {
            cache.insert(key, Arc::clone(&block), index_entry.size as usize);
        }

        Ok(block)
    }

    fn load_block(&self, index_entry: &IndexEntry) -> Result<Vec<SSTableEntry>> {
        if index_entry.size < 4 {
            return Err(Error::Corruption("SSTable block too small".into()));
        }
        let mut buf = vec![0u8; index_entry.size as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(index_entry.offset))?;
            file.read_exact(&mut buf)?;
        }

        let data_len = buf.len() - 4;
        let stored_crc = u32::from_le_bytes([
            buf[data_len],
            buf[data_len + 1],
            buf[data_len + 2],
            buf[data_len + 3],
        ]);
        let data = &buf[..data_len];
        if stored_crc != crc32fast::hash(data) {
            return Err(Error::Corruption(format!(
                "Block CRC mismatch in {} at offset {}",
                self.path.display(),
                index_entry.offset
            )));
        }

        let mut entries = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            if offset + 4 > data.len() {
                return Err(Error::Corruption("truncated entry in SSTable block".into()));
            }
            let len = u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]) as usize;
            offset += 4;

            if offset + len > data.len() {
                return Err(Error::Corruption("truncated entry in SSTable block".into()));
            }

            let entry: SSTableEntry = bincode::deserialize(&data[offset..offset + len])?;
            entries.push(entry);
            offset += len;
        }

        Ok(entries)
    }

    /// Read every block, checking CRCs, key order and the entry count.
    pub fn verify(&self) -> Result<()> {
        let mut last: Option<Vec<u8>> = None;
        let mut count = 0u64;
        for entry in &self.index {
            for item in self.load_block(entry)? {
                if let Some(prev) = &last {
                    if item.key <= *prev {
                        return Err(Error::Corruption(format!(
                            "keys out of order in {}",
                            self.path.display()
                        )));
                    }
                }
                last = Some(item.key);
                count += 1;
            }
        }
        if count != self.footer.entry_count {
            return Err(Error::Corruption(format!(
                "{} holds {} entries, footer says {}",
                self.path.display(),
                count,
                self.footer.entry_count
            )));
        }
        Ok(())
    }

    /// Get metadata about this SSTable
    pub fn metadata(&self) -> SSTableMeta {
        SSTableMeta {
            number: self.number,
            min_key: self.footer.min_key.clone(),
            max_key: self.footer.max_key.clone(),
            entry_count: self.footer.entry_count,
            file_size: self.file_size,
            level: 0,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    /// Check if a key might be in this SSTable (range check)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.footer.entry_count > 0
            && key >= self.footer.min_key.as_slice()
            && key <= self.footer.max_key.as_slice()
    }

    /// Cursor over the table's entries, unpositioned
    pub fn cursor(self: &Arc<Self>) -> TableCursor {
        TableCursor {
            reader: Arc::clone(self),
            block_idx: 0,
            block: None,
            entry_idx: 0,
        }
    }
}

/// Positioned cursor over one table, holding its reader alive
pub struct TableCursor {
    reader: Arc<SSTableReader>,
    block_idx: usize,
    block: Option<Block>,
    entry_idx: usize,
}

impl TableCursor {
    /// Position at the first entry
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.load(0)?;
        self.skip_exhausted_blocks()
    }

    /// Position at the first entry with a key at or after `key`
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        let block_idx = self.reader.block_for(key).unwrap_or(0);
        self.load(block_idx)?;
        if let Some(block) = &self.block {
            self.entry_idx = block.partition_point(|e| e.key.as_slice() < key);
        }
        self.skip_exhausted_blocks()
    }

    /// Current entry, `None` once exhausted
    pub fn current(&self) -> Option<&SSTableEntry> {
        self.block.as_ref().and_then(|b| b.get(self.entry_idx))
    }

    /// Move to the next entry
    pub fn advance(&mut self) -> Result<()> {
        if self.block.is_some() {
            self.entry_idx += 1;
            self.skip_exhausted_blocks()?;
        }
        Ok(())
    }

    fn load(&mut self, block_idx: usize) -> Result<()> {
        self.block_idx = block_idx;
        self.entry_idx = 0;
        self.block = if block_idx < self.reader.index.len() {
            Some(self.reader.read_block(block_idx)?)
        } else {
            None
        };
        Ok(())
    }

    fn skip_exhausted_blocks(&mut self) -> Result<()> {
        while let Some(block) = &self.block {
            if self.entry_idx < block.len() {
                break;
            }
            self.load(self.block_idx + 1)?;
        }
        Ok(())
    }
}

/// Delete an SSTable file
pub fn delete_sstable(dir: &Path, number: u64) -> Result<()> {
    fs::remove_file(dir.join(table_file_name(number)))?;
    Ok(())
}
