//! Shared LRU cache of decoded SSTable data blocks.
//!
//! One cache is shared by every store of an environment. Capacity is a byte
//! budget; each block is charged its on-disk size.

use crate::sstable::SSTableEntry;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A decoded data block.
pub type Block = Arc<Vec<SSTableEntry>>;

/// Blocks are identified by table file number and block offset. Stores
/// sharing a cache use disjoint namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub namespace: u64,
    pub table: u64,
    pub offset: u64,
}

struct CacheEntry {
    block: Block,
    charge: usize,
    tick: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<BlockKey, CacheEntry>,
    /// Access tick -> key, oldest first
    recency: BTreeMap<u64, BlockKey>,
    usage: usize,
    next_tick: u64,
    next_namespace: u64,
    hits: u64,
    misses: u64,
}

/// Byte-budgeted LRU block cache
pub struct BlockCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub capacity: usize,
    pub usage: usize,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Cache sized in MiB
    pub fn with_mb(mb: usize) -> Self {
        Self::new(mb * 1024 * 1024)
    }

    /// Reserve a namespace for one store.
    pub fn new_namespace(&self) -> u64 {
        let mut state = self.state.lock();
        state.next_namespace += 1;
        state.next_namespace
    }

    pub fn get(&self, key: &BlockKey) -> Option<Block> {
        let mut state = self.state.lock();
        let tick = state.next_tick;

        let found = match state.entries.get_mut(key) {
            Some(entry) => {
                let old_tick = entry.tick;
                entry.tick = tick;
                Some((old_tick, Arc::clone(&entry.block)))
            }
            None => None,
        };

        match found {
            Some((old_tick, block)) => {
                state.next_tick += 1;
                state.recency.remove(&old_tick);
                state.recency.insert(tick, *key);
                state.hits += 1;
                Some(block)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Insert a block, evicting least recently used blocks past capacity.
    ///
    /// A block larger than the whole budget is not cached.
    pub fn insert(&self, key: BlockKey, block: Block, charge: usize) {
        if charge > self.capacity {
            return;
        }

        let mut state = self.state.lock();
        Self::remove_locked(&mut state, &key);

        let tick = state.next_tick;
        state.next_tick += 1;
        state.entries.insert(key, CacheEntry { block, charge, tick });
        state.recency.insert(tick, key);
        state.usage += charge;

        while state.usage > self.capacity {
            let oldest = match state.recency.keys().next() {
                Some(&t) => t,
                None => break,
            };
            if let Some(victim) = state.recency.remove(&oldest) {
                if let Some(entry) = state.entries.remove(&victim) {
                    state.usage -= entry.charge;
                }
            }
        }
    }

    fn remove_locked(state: &mut CacheState, key: &BlockKey) {
        if let Some(entry) = state.entries.remove(key) {
            state.recency.remove(&entry.tick);
            state.usage -= entry.charge;
        }
    }

    /// Drop every block of a table that no longer exists.
    pub fn erase_table(&self, namespace: u64, table: u64) {
        let mut state = self.state.lock();
        let victims: Vec<BlockKey> = state
            .entries
            .keys()
            .filter(|k| k.namespace == namespace && k.table == table)
            .copied()
            .collect();
        for key in victims {
            Self::remove_locked(&mut state, &key);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            capacity: self.capacity,
            usage: state.usage,
            entries: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
        }
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("stats", &self.stats())
            .finish()
    }
}
