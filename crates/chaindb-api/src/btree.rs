//! B-tree backend: page files sharing one write-ahead log

use crate::backend::{Backend, FileHandle};
use crate::config::DbConfig;
use crate::iter::DbIterator;
use chaindb_btree::{BTreeEnv, BTreeFile, BTreeOptions, Txn};
use chaindb_core::{BackendKind, Error, OpenMode, Result};
use chaindb_lsm::BatchLookup;
use parking_lot::Mutex;
use std::sync::Arc;

impl FileHandle for BTreeFile {
    type Pending = Txn;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        BTreeFile::get(self, key)
    }

    fn put(&self, key: &[u8], value: &[u8], overwrite: bool) -> Result<()> {
        if overwrite {
            BTreeFile::put(self, key, value)
        } else {
            self.put_no_overwrite(key, value)
        }
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        BTreeFile::delete(self, key).map(|_| ())
    }

    fn iter(&self, lock: Arc<Mutex<()>>) -> Result<DbIterator> {
        Ok(DbIterator::btree(self.cursor()?, lock))
    }

    fn begin(&self) -> Result<Txn> {
        BTreeFile::begin(self)
    }

    fn pending_get(&self, txn: &Txn, key: &[u8]) -> Result<Option<Vec<u8>>> {
        txn.get(self, key)
    }

    fn pending_put(&self, txn: &mut Txn, key: &[u8], value: &[u8], overwrite: bool) -> Result<()> {
        if overwrite {
            txn.put(key, value)
        } else {
            txn.put_no_overwrite(self, key, value)
        }
    }

    fn pending_delete(&self, txn: &mut Txn, key: &[u8]) -> Result<()> {
        txn.delete(key)
    }

    fn scan_pending(&self, _txn: &Txn, _key: &[u8]) -> Result<BatchLookup> {
        Err(Error::Unsupported {
            backend: BackendKind::BTree,
            operation: "scan_pending",
        })
    }

    fn commit(&self, txn: Txn) -> Result<()> {
        txn.commit(self)
    }

    fn abort(txn: Txn) {
        txn.abort();
    }
}

/// Environment of B-tree files rooted at the data directory
pub struct BTreeBackend {
    env: BTreeEnv,
}

impl BTreeBackend {
    pub fn env(&self) -> &BTreeEnv {
        &self.env
    }
}

impl Backend for BTreeBackend {
    const KIND: BackendKind = BackendKind::BTree;

    type Handle = BTreeFile;
    type Options = BTreeOptions;

    fn options(config: &DbConfig) -> BTreeOptions {
        config.btree_options()
    }

    fn open(config: &DbConfig, options: &BTreeOptions) -> Result<Self> {
        let env = BTreeEnv::open(&config.data_dir, options.clone())?;
        Ok(Self { env })
    }

    /// Physical handles are always writable; handle objects enforce their
    /// own read-only mode
    fn open_file(&self, name: &str, mode: OpenMode) -> Result<BTreeFile> {
        self.env.open_file(
            name,
            OpenMode {
                read_only: false,
                create: mode.create,
            },
        )
    }

    fn close_file(&self, name: &str, handle: BTreeFile) -> Result<()> {
        drop(handle);
        self.env.close_file(name)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.env.file_exists(name)
    }

    fn checkpoint(&self, _open: &[BTreeFile], kbytes: u64, minutes: u64) -> Result<bool> {
        self.env.checkpoint(kbytes, minutes)
    }

    fn lsn_reset(&self, name: &str) -> Result<()> {
        self.env.lsn_reset(name)
    }

    fn verify(&self, name: &str) -> Result<()> {
        self.env.verify(name).map(|_| ())
    }

    fn salvage(&self, name: &str, aggressive: bool) -> Result<String> {
        self.env.salvage(name, aggressive)
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.env.remove_file(name)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.env.rename_file(from, to)
    }

    fn archive_logs(&self) -> Result<()> {
        self.env.remove_log_segments().map(|_| ())
    }

    fn close(&self) -> Result<()> {
        self.env.close()
    }
}
