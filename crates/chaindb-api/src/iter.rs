//! One traversal type over B-tree cursors and LSM iterators
//!
//! Both engines traverse in lexicographic key order. A B-tree cursor is
//! driven by the positioning flag passed to every read; an LSM iterator
//! starts at the first key and only moves forward, honouring `SetRange`
//! as a seek and treating every other flag as "next".
//!
//! Exhaustion is final: after one `NotFound`, every later read on the same
//! iterator is `NotFound` too.

use chaindb_btree::{Cursor, CursorOp};
use chaindb_core::{BackendKind, Error, Result};
use chaindb_lsm::LsmIterator;
use parking_lot::Mutex;
use std::sync::Arc;

enum Traversal {
    BTree(Cursor),
    Lsm(LsmIterator),
}

/// Iterator over the records of one file
pub struct DbIterator {
    traversal: Traversal,
    lock: Arc<Mutex<()>>,
    exhausted: bool,
}

impl DbIterator {
    /// Unpositioned cursor
    pub(crate) fn btree(cursor: Cursor, lock: Arc<Mutex<()>>) -> Self {
        Self {
            traversal: Traversal::BTree(cursor),
            lock,
            exhausted: false,
        }
    }

    /// Forward iterator, positioned at the first key by the caller
    pub(crate) fn lsm(iter: LsmIterator, lock: Arc<Mutex<()>>) -> Self {
        Self {
            traversal: Traversal::Lsm(iter),
            lock,
            exhausted: false,
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self.traversal {
            Traversal::BTree(_) => BackendKind::BTree,
            Traversal::Lsm(_) => BackendKind::Lsm,
        }
    }

    /// False once a read returned `NotFound`
    pub fn is_valid(&self) -> bool {
        !self.exhausted
    }

    /// Read the record selected by `op`.
    ///
    /// The engine's copies of the record are zeroed once the caller has
    /// its own. Returns `Error::NotFound` when nothing is left.
    pub fn read_next(&mut self, op: &CursorOp) -> Result<(Vec<u8>, Vec<u8>)> {
        if self.exhausted {
            return Err(Error::NotFound);
        }
        let _step = self.lock.lock();

        let record = match &mut self.traversal {
            Traversal::BTree(cursor) => {
                if cursor.get(op)? {
                    let record = (cursor.key().to_vec(), cursor.value().to_vec());
                    cursor.scrub();
                    Some(record)
                } else {
                    None
                }
            }
            Traversal::Lsm(iter) => {
                if let CursorOp::SetRange(key) = op {
                    iter.seek(key)?;
                }
                if iter.valid() {
                    let record = (iter.key().to_vec(), iter.value().to_vec());
                    iter.scrub();
                    iter.next()?;
                    Some(record)
                } else {
                    None
                }
            }
        };

        record.ok_or_else(|| {
            self.exhausted = true;
            Error::NotFound
        })
    }
}

impl Iterator for DbIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    /// Records in key order from the current position
    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next(&CursorOp::Next) {
            Err(Error::NotFound) => None,
            other => Some(other),
        }
    }
}

impl std::fmt::Debug for DbIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbIterator")
            .field("kind", &self.kind())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
