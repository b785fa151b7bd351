//! LSM backend: one store directory per instance name
//!
//! Every store opened by one environment shares the environment's block
//! cache. A transaction is a write batch that reads fall through to, and
//! is applied atomically on commit.

use crate::backend::{Backend, FileHandle};
use crate::config::DbConfig;
use crate::iter::DbIterator;
use chaindb_core::{BackendKind, Error, OpenMode, Result};
use chaindb_lsm::{BatchLookup, LsmOptions, LsmStore, WriteBatch};
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

impl FileHandle for Arc<LsmStore> {
    type Pending = WriteBatch;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        LsmStore::get(self, key)
    }

    fn put(&self, key: &[u8], value: &[u8], overwrite: bool) -> Result<()> {
        if !overwrite && LsmStore::get(self, key)?.is_some() {
            return Err(Error::KeyExists);
        }
        LsmStore::put(self, key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        LsmStore::delete(self, key)
    }

    fn iter(&self, lock: Arc<Mutex<()>>) -> Result<DbIterator> {
        let mut iter = self.new_iterator();
        iter.seek_to_first()?;
        Ok(DbIterator::lsm(iter, lock))
    }

    fn begin(&self) -> Result<WriteBatch> {
        Ok(WriteBatch::new())
    }

    fn pending_get(&self, batch: &WriteBatch, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match batch.scan(key) {
            BatchLookup::Found(value) => Ok(Some(value)),
            BatchLookup::Deleted => Ok(None),
            BatchLookup::Absent => LsmStore::get(self, key),
        }
    }

    fn pending_put(
        &self,
        batch: &mut WriteBatch,
        key: &[u8],
        value: &[u8],
        overwrite: bool,
    ) -> Result<()> {
        if !overwrite && self.pending_get(batch, key)?.is_some() {
            return Err(Error::KeyExists);
        }
        batch.put(key, value);
        Ok(())
    }

    fn pending_delete(&self, batch: &mut WriteBatch, key: &[u8]) -> Result<()> {
        batch.delete(key);
        Ok(())
    }

    fn scan_pending(&self, batch: &WriteBatch, key: &[u8]) -> Result<BatchLookup> {
        Ok(batch.scan(key))
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.write(&batch)
    }
}

/// Environment of LSM stores under the data directory
pub struct LsmBackend {
    root: PathBuf,
    options: LsmOptions,
}

impl LsmBackend {
    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

/// Suffix of the store a rename is replacing, kept until the new one is
/// in place
pub const REPLACED_SUFFIX: &str = ".replaced";

/// Move the store at `from` to `to`. An existing store at `to` is parked
/// at `backup` first and put back if the move fails.
fn replace_dir(
    from: &Path,
    to: &Path,
    backup: &Path,
    mut move_dir: impl FnMut(&Path, &Path) -> io::Result<()>,
) -> Result<()> {
    if !to.exists() {
        move_dir(from, to)?;
        return Ok(());
    }

    LsmStore::destroy(backup)?;
    move_dir(to, backup)?;
    if let Err(e) = move_dir(from, to) {
        if let Err(restore) = move_dir(backup, to) {
            warn!(
                store = %to.display(),
                backup = %backup.display(),
                error = %restore,
                "failed to restore replaced store"
            );
        }
        return Err(e.into());
    }
    if let Err(e) = LsmStore::destroy(backup) {
        warn!(backup = %backup.display(), error = %e, "failed to remove replaced store");
    }
    Ok(())
}

fn not_found(path: &Path) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    ))
}

impl Backend for LsmBackend {
    const KIND: BackendKind = BackendKind::Lsm;

    type Handle = Arc<LsmStore>;
    type Options = LsmOptions;

    fn options(config: &DbConfig) -> LsmOptions {
        config.lsm_options()
    }

    fn open(config: &DbConfig, options: &LsmOptions) -> Result<Self> {
        let root = config.data_dir.clone();
        fs::create_dir_all(&root)?;
        for instance in &config.lsm_instances {
            let store = LsmStore::open_with_options(root.join(instance), options.clone())?;
            store.close()?;
            debug!(instance = %instance, "prepared LSM instance");
        }
        Ok(Self {
            root,
            options: options.clone(),
        })
    }

    fn open_file(&self, name: &str, mode: OpenMode) -> Result<Arc<LsmStore>> {
        let options = LsmOptions {
            create_if_missing: mode.create,
            ..self.options.clone()
        };
        Ok(Arc::new(LsmStore::open_with_options(self.path(name), options)?))
    }

    fn close_file(&self, _name: &str, handle: Arc<LsmStore>) -> Result<()> {
        handle.close()
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path(name).is_dir()
    }

    /// Flushes every open store's memtable
    fn checkpoint(&self, open: &[Arc<LsmStore>], _kbytes: u64, _minutes: u64) -> Result<bool> {
        for store in open {
            store.flush()?;
        }
        Ok(true)
    }

    fn verify(&self, name: &str) -> Result<()> {
        let options = LsmOptions {
            create_if_missing: false,
            ..self.options.clone()
        };
        let store = LsmStore::open_with_options(self.path(name), options)?;
        let verified = store.verify();
        store.close()?;
        verified
    }

    fn remove(&self, name: &str) -> Result<()> {
        let path = self.path(name);
        if !path.is_dir() {
            return Err(not_found(&path));
        }
        LsmStore::destroy(path)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.path(from);
        if !from_path.is_dir() {
            return Err(not_found(&from_path));
        }
        let backup = self.path(&format!("{}{}", to, REPLACED_SUFFIX));
        replace_dir(&from_path, &self.path(to), &backup, |from, to| fs::rename(from, to))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
