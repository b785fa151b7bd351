//! Forward iterator merging the memtables and every live table.
//!
//! Sources are ordered newest first. At each step the smallest current key
//! wins; when several sources hold that key the newest one supplies the
//! entry and the others are stepped past it. Tombstones are skipped.
//!
//! The iterator owns snapshots (`Arc`s) of everything it reads, so it stays
//! consistent while the store keeps taking writes, flushing and compacting.

use crate::memtable::Memtable;
use crate::sstable::TableCursor;
use chaindb_core::Result;
use std::sync::Arc;
use zeroize::Zeroize;

struct MemCursor {
    table: Arc<Memtable>,
    current: Option<(Vec<u8>, Option<Vec<u8>>)>,
}

impl MemCursor {
    fn new(table: Arc<Memtable>) -> Self {
        Self {
            table,
            current: None,
        }
    }

    fn load(&mut self, key: &[u8], inclusive: bool) {
        self.current = self
            .table
            .first_from(key, inclusive)
            .map(|(k, v)| (k.to_vec(), v.map(<[u8]>::to_vec)));
    }

    fn seek(&mut self, key: &[u8]) {
        self.load(key, true);
    }

    fn advance(&mut self) {
        if let Some((key, _)) = self.current.take() {
            self.load(&key, false);
        }
    }

    fn current(&self) -> Option<(&[u8], Option<&[u8]>)> {
        self.current
            .as_ref()
            .map(|(k, v)| (k.as_slice(), v.as_deref()))
    }
}

enum Source {
    Mem(MemCursor),
    Table(TableCursor),
}

impl Source {
    fn seek(&mut self, key: &[u8]) -> Result<()> {
        match self {
            Source::Mem(c) => {
                c.seek(key);
                Ok(())
            }
            Source::Table(c) => c.seek(key),
        }
    }

    fn advance(&mut self) -> Result<()> {
        match self {
            Source::Mem(c) => {
                c.advance();
                Ok(())
            }
            Source::Table(c) => c.advance(),
        }
    }

    /// Current key and value; `None` value marks a tombstone
    fn current(&self) -> Option<(&[u8], Option<&[u8]>)> {
        match self {
            Source::Mem(c) => c.current(),
            Source::Table(c) => c.current().map(|e| {
                let value = if e.is_tombstone() {
                    None
                } else {
                    Some(e.value.as_slice())
                };
                (e.key.as_slice(), value)
            }),
        }
    }
}

/// Merging forward iterator over an LSM store
pub struct LsmIterator {
    sources: Vec<Source>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl LsmIterator {
    pub(crate) fn new(memtables: Vec<Arc<Memtable>>, tables: Vec<TableCursor>) -> Self {
        let sources = memtables
            .into_iter()
            .map(|m| Source::Mem(MemCursor::new(m)))
            .chain(tables.into_iter().map(Source::Table))
            .collect();
        Self {
            sources,
            current: None,
        }
    }

    /// Position at the first live key
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.seek(&[])
    }

    /// Position at the first live key at or after `key`
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        for source in &mut self.sources {
            source.seek(key)?;
        }
        self.resolve()
    }

    /// Whether the iterator is positioned at an entry
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Key at the current position; empty when invalid
    pub fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(k, _)| k.as_slice()).unwrap_or(&[])
    }

    /// Value at the current position; empty when invalid
    pub fn value(&self) -> &[u8] {
        self.current.as_ref().map(|(_, v)| v.as_slice()).unwrap_or(&[])
    }

    /// Step to the next live key
    pub fn next(&mut self) -> Result<()> {
        if let Some((key, _)) = self.current.take() {
            self.step_past(&key)?;
            self.resolve()?;
        }
        Ok(())
    }

    /// Overwrite the iterator's copy of the current value with zeroes.
    ///
    /// The key is kept so `next` can still advance past the entry.
    pub fn scrub(&mut self) {
        if let Some((_, value)) = &mut self.current {
            value.zeroize();
        }
    }

    fn step_past(&mut self, key: &[u8]) -> Result<()> {
        for source in &mut self.sources {
            while matches!(source.current(), Some((k, _)) if k <= key) {
                source.advance()?;
            }
        }
        Ok(())
    }

    /// Settle on the smallest key across sources that is not deleted
    fn resolve(&mut self) -> Result<()> {
        loop {
            let mut best: Option<(Vec<u8>, Option<Vec<u8>>)> = None;
            for source in &self.sources {
                if let Some((key, value)) = source.current() {
                    let better = match &best {
                        None => true,
                        // Strictly smaller only: ties keep the newer source
                        Some((best_key, _)) => key < best_key.as_slice(),
                    };
                    if better {
                        best = Some((key.to_vec(), value.map(|v| v.to_vec())));
                    }
                }
            }

            match best {
                None => {
                    self.current = None;
                    return Ok(());
                }
                Some((key, Some(value))) => {
                    self.current = Some((key, value));
                    return Ok(());
                }
                Some((key, None)) => self.step_past(&key)?,
            }
        }
    }
}

impl Drop for LsmIterator {
    fn drop(&mut self) {
        if let Some((key, value)) = &mut self.current {
            key.zeroize();
            value.zeroize();
        }
    }
}
