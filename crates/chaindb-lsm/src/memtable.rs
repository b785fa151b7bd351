//! Sorted in-memory buffer of recent writes.
//!
//! A deleted key stays in the buffer with no value so that it hides older
//! values in the tables until the buffer is flushed. The store keeps the
//! buffer behind an `Arc`: iterators hold the one they started on, and a
//! write clones it only while such an iterator is alive.

use std::collections::BTreeMap;
use std::ops::Bound;

/// A key's latest state; `None` marks a deletion
pub type Slot<'a> = (&'a [u8], Option<&'a [u8]>);

#[derive(Debug, Clone, Default)]
pub struct Memtable {
    entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    bytes: u64,
}

fn footprint(key: &[u8], value: &Option<Vec<u8>>) -> u64 {
    // One byte for the presence flag
    (key.len() + value.as_ref().map_or(0, Vec::len) + 1) as u64
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) {
        self.bytes += footprint(&key, &value);
        if let Some(old) = self.entries.get(&key) {
            self.bytes -= footprint(&key, old);
        }
        self.entries.insert(key, value);
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.set(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.set(key, None);
    }

    /// `None` when the buffer knows nothing about `key`, `Some(None)` when
    /// it holds a deletion
    pub fn get(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.entries.get(key).map(|value| value.as_deref())
    }

    /// First slot at or after `key`, or strictly after it
    pub fn first_from(&self, key: &[u8], inclusive: bool) -> Option<Slot<'_>> {
        let start = if inclusive {
            Bound::Included(key)
        } else {
            Bound::Excluded(key)
        };
        self.entries
            .range::<[u8], _>((start, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.as_slice(), v.as_deref()))
    }

    /// Approximate memory held by keys and values
    pub fn size_bytes(&self) -> u64 {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every slot in key order
    pub fn iter(&self) -> impl Iterator<Item = Slot<'_>> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_deref()))
    }
}
