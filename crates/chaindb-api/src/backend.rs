//! The seam between environments and storage engines
//!
//! [`Backend`] is the environment-level contract: open the engine, open and
//! close files, and run the maintenance primitives. [`FileHandle`] is the
//! contract of one open file, including the pending work of a
//! transaction or batch. The three engines implement both.

use crate::config::DbConfig;
use crate::iter::DbIterator;
use chaindb_core::{BackendKind, OpenMode, Result};
use chaindb_lsm::BatchLookup;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// One open physical file
pub trait FileHandle: Clone + Send + Sync + 'static {
    /// Work buffered by an active transaction or batch
    type Pending: Send + 'static;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write a record; with `overwrite` unset an existing key is
    /// `Error::KeyExists`
    fn put(&self, key: &[u8], value: &[u8], overwrite: bool) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Ordered traversal whose steps take `lock`
    fn iter(&self, lock: Arc<Mutex<()>>) -> Result<DbIterator>;

    fn begin(&self) -> Result<Self::Pending>;

    /// Read through pending work to the committed records
    fn pending_get(&self, pending: &Self::Pending, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn pending_put(
        &self,
        pending: &mut Self::Pending,
        key: &[u8],
        value: &[u8],
        overwrite: bool,
    ) -> Result<()>;

    fn pending_delete(&self, pending: &mut Self::Pending, key: &[u8]) -> Result<()>;

    /// What the pending work alone says about `key`
    fn scan_pending(&self, pending: &Self::Pending, key: &[u8]) -> Result<BatchLookup>;

    fn commit(&self, pending: Self::Pending) -> Result<()>;

    fn abort(pending: Self::Pending) {
        drop(pending);
    }
}

/// A storage engine behind an environment
///
/// Maintenance methods are only called for files the environment has
/// closed.
pub trait Backend: Sized + Send + Sync + 'static {
    const KIND: BackendKind;

    type Handle: FileHandle;

    /// Engine tuning derived from the configuration
    type Options: Clone + fmt::Debug + Send + Sync;

    fn options(config: &DbConfig) -> Self::Options;

    fn open(config: &DbConfig, options: &Self::Options) -> Result<Self>;

    fn open_file(&self, name: &str, mode: OpenMode) -> Result<Self::Handle>;

    fn close_file(&self, name: &str, handle: Self::Handle) -> Result<()>;

    fn file_exists(&self, name: &str) -> bool;

    /// Make recent writes durable in the files themselves; `open` lists
    /// the files currently open. Returns whether anything ran.
    fn checkpoint(&self, open: &[Self::Handle], kbytes: u64, minutes: u64) -> Result<bool>;

    /// Make a closed file independent of any shared log
    fn lsn_reset(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn verify(&self, name: &str) -> Result<()>;

    /// Dump the readable records of a damaged file
    fn salvage(&self, _name: &str, _aggressive: bool) -> Result<String> {
        Err(chaindb_core::Error::Unsupported {
            backend: Self::KIND,
            operation: "salvage",
        })
    }

    fn remove(&self, name: &str) -> Result<()>;

    /// Rename a closed file, replacing any file called `to`
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Delete log segments no file depends on
    fn archive_logs(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()>;
}
