//! Open B-tree files
//!
//! Every open file keeps its whole sorted tree in memory. Writes are logged
//! to the environment's shared WAL before they are applied, and the tree is
//! written back as a page image on checkpoint and close.

use crate::cursor::Cursor;
use crate::page::write_page_file;
use crate::txn::Txn;
use chaindb_core::{Error, Result};
use chaindb_wal::{LogRecord, Wal};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable log id for a file name
pub(crate) fn file_id(name: &str) -> u64 {
    let low = crc32fast::hash(name.as_bytes());
    let mut hasher = crc32fast::Hasher::new_with_initial(low);
    hasher.update(name.as_bytes());
    (u64::from(hasher.finalize()) << 32) | u64::from(low)
}

pub(crate) struct Tree {
    pub(crate) entries: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Last log record applied to `entries`
    pub(crate) lsn: u64,
    pub(crate) dirty: bool,
    pub(crate) closed: bool,
}

pub(crate) struct FileInner {
    pub(crate) name: String,
    pub(crate) id: u64,
    pub(crate) path: PathBuf,
    pub(crate) wal: Arc<Mutex<Wal>>,
    pub(crate) next_tx: Arc<AtomicU64>,
    pub(crate) max_locks: usize,
    pub(crate) tree: RwLock<Tree>,
}

impl FileInner {
    pub(crate) fn read_tree(&self) -> Result<RwLockReadGuard<'_, Tree>> {
        let tree = self.tree.read();
        if tree.closed {
            return Err(self.closed_error());
        }
        Ok(tree)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        self.read_tree().map(|_| ())
    }

    fn closed_error(&self) -> Error {
        Error::InvalidInput(format!("{} is closed", self.name))
    }

    /// Write the tree back if it changed since the last image
    pub(crate) fn persist(&self, tree: &mut Tree, lsn: u64) -> Result<()> {
        if !tree.dirty {
            return Ok(());
        }
        write_page_file(&self.path, &tree.entries, lsn, false)?;
        tree.lsn = lsn;
        tree.dirty = false;
        Ok(())
    }

    /// Log `records` as one group, then apply `ops` to the tree.
    ///
    /// `check` runs against the tree before anything is logged and can
    /// refuse the write.
    pub(crate) fn log_and_apply<F>(
        &self,
        records: Vec<LogRecord>,
        ops: Vec<(Vec<u8>, Option<Vec<u8>>)>,
        check: F,
    ) -> Result<()>
    where
        F: FnOnce(&BTreeMap<Vec<u8>, Vec<u8>>) -> Result<()>,
    {
        let mut wal = self.wal.lock();
        let mut tree = self.tree.write();
        if tree.closed {
            return Err(self.closed_error());
        }
        check(&tree.entries)?;

        let lsn = wal.append_all(records)?;
        for (key, value) in ops {
            match value {
                Some(value) => {
                    tree.entries.insert(key, value);
                }
                None => {
                    tree.entries.remove(&key);
                }
            }
        }
        tree.lsn = lsn;
        tree.dirty = true;
        Ok(())
    }
}

/// Handle to an open B-tree file
///
/// Clones share the same file. A read-only handle refuses writes even when
/// another handle to the same file is writable.
#[derive(Clone)]
pub struct BTreeFile {
    pub(crate) inner: Arc<FileInner>,
    read_only: bool,
}

impl BTreeFile {
    pub(crate) fn new(inner: Arc<FileInner>, read_only: bool) -> Self {
        Self { inner, read_only }
    }

    /// File name inside the environment root
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly(self.inner.name.clone()));
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read_tree()?.entries.get(key).cloned())
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.inner.read_tree()?.entries.contains_key(key))
    }

    /// Insert or replace a key, committed on return
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        let record = LogRecord::put(self.inner.id, key.to_vec(), value.to_vec());
        self.inner.log_and_apply(
            vec![record],
            vec![(key.to_vec(), Some(value.to_vec()))],
            |_| Ok(()),
        )
    }

    /// Insert a key that must not exist yet
    pub fn put_no_overwrite(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        let record = LogRecord::put(self.inner.id, key.to_vec(), value.to_vec());
        self.inner.log_and_apply(
            vec![record],
            vec![(key.to_vec(), Some(value.to_vec()))],
            |entries| {
                if entries.contains_key(key) {
                    Err(Error::KeyExists)
                } else {
                    Ok(())
                }
            },
        )
    }

    /// Remove a key; returns whether it was present
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.check_writable()?;
        if !self.exists(key)? {
            return Ok(false);
        }
        let record = LogRecord::delete(self.inner.id, key.to_vec());
        self.inner
            .log_and_apply(vec![record], vec![(key.to_vec(), None)], |_| Ok(()))?;
        Ok(true)
    }

    /// Number of records
    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.read_tree()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Start a transaction on this file
    pub fn begin(&self) -> Result<Txn> {
        self.inner.ensure_open()?;
        let id = self.inner.next_tx.fetch_add(1, Ordering::Relaxed);
        Ok(Txn::new(self, id))
    }

    /// Open an unpositioned cursor over committed records
    pub fn cursor(&self) -> Result<Cursor> {
        self.inner.ensure_open()?;
        Ok(Cursor::new(Arc::clone(&self.inner)))
    }
}

impl std::fmt::Debug for BTreeFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeFile")
            .field("name", &self.inner.name)
            .field("read_only", &self.read_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BTreeEnv, BTreeOptions};
    use chaindb_core::OpenMode;
    use tempfile::tempdir;

    #[test]
    fn test_file_id_is_stable_and_distinct() {
        assert_eq!(file_id("wallet.dat"), file_id("wallet.dat"));
        assert_ne!(file_id("wallet.dat"), file_id("addr.dat"));
        assert_ne!(file_id("ab"), file_id("ba"));
    }

    #[test]
    fn test_put_get_delete() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();

        file.put(b"k", b"v").unwrap();
        assert_eq!(file.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(file.exists(b"k").unwrap());

        assert!(file.delete(b"k").unwrap());
        assert!(!file.delete(b"k").unwrap());
        assert_eq!(file.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_put_no_overwrite() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();

        file.put_no_overwrite(b"k", b"1").unwrap();
        assert!(matches!(
            file.put_no_overwrite(b"k", b"2"),
            Err(Error::KeyExists)
        ));
        assert_eq!(file.get(b"k").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_read_only_handle_refuses_writes() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
        let reader = env.open_file("wallet.dat", OpenMode::READ).unwrap();

        assert!(matches!(reader.put(b"k", b"v"), Err(Error::ReadOnly(_))));
    }

    #[test]
    fn test_closed_file_refuses_access() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
        env.close_file("wallet.dat").unwrap();

        assert!(file.get(b"k").is_err());
        assert!(file.put(b"k", b"v").is_err());
    }
}
