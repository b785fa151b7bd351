//! Handle-scoped storage objects
//!
//! A [`Db`] is what [`Environment::create`] hands out: one acquisition of
//! one logical file. It reads and writes through the environment's cached
//! physical handle, runs at most one transaction or batch at a time, and
//! gives its acquisition back exactly once when dropped.
//!
//! [`KeyValueStore`] is the contract collaborators program against; it is
//! object safe so chain code can hold a `Box<dyn KeyValueStore>` without
//! knowing the backend. [`RecordStore`] layers `bincode` records on top.

use crate::backend::{Backend, FileHandle};
use crate::btree::BTreeBackend;
use crate::env::Environment;
use crate::iter::DbIterator;
use crate::lsm::LsmBackend;
use crate::registry::FileShared;
use crate::sql::SqlBackend;
use crate::txn::SlotGuard;
use crate::validate::{validate_key, validate_value};
use chaindb_core::{
    decode_version, encode_version, BackendKind, Error, Result, CLIENT_VERSION, VERSION_KEY,
};
use chaindb_lsm::BatchLookup;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

static NEXT_HOLDER: AtomicU64 = AtomicU64::new(1);

/// Key/value operations on one logical file
pub trait KeyValueStore: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    fn is_read_only(&self) -> bool;

    /// `Ok(None)` for a missing key
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`. With `overwrite` unset an existing key
    /// is `Error::KeyExists` and nothing changes.
    fn write(&self, key: &[u8], value: &[u8], overwrite: bool) -> Result<()>;

    /// Remove `key`; removing a missing key succeeds
    fn erase(&self, key: &[u8]) -> Result<()>;

    fn exists(&self, key: &[u8]) -> Result<bool>;

    /// Start a transaction or batch on this file
    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn abort(&self) -> Result<()>;

    /// What the active batch alone says about `key`
    fn scan_pending(&self, key: &[u8]) -> Result<BatchLookup>;

    fn iter(&self) -> Result<DbIterator>;

    fn read_version(&self) -> Result<Option<i32>> {
        self.read(VERSION_KEY)?
            .map(|raw| decode_version(&raw))
            .transpose()
    }

    fn write_version(&self, version: i32) -> Result<()> {
        self.write(VERSION_KEY, &encode_version(version), true)
    }
}

/// Typed records stored with `bincode`
pub trait RecordStore: KeyValueStore {
    fn read_record<K, V>(&self, key: &K) -> Result<Option<V>>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        let key = encode(key)?;
        match self.read(&key)? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    fn write_record<K, V>(&self, key: &K, value: &V, overwrite: bool) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        self.write(&encode(key)?, &encode(value)?, overwrite)
    }

    fn erase_record<K: Serialize + ?Sized>(&self, key: &K) -> Result<()> {
        self.erase(&encode(key)?)
    }

    fn contains_record<K: Serialize + ?Sized>(&self, key: &K) -> Result<bool> {
        self.exists(&encode(key)?)
    }
}

impl<T: KeyValueStore + ?Sized> RecordStore for T {}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

type Pending<B> = <<B as Backend>::Handle as FileHandle>::Pending;

/// One acquisition of a logical file
pub struct Db<B: Backend> {
    env: Environment<B>,
    name: String,
    read_only: bool,
    shared: Arc<FileShared<Pending<B>>>,
    holder: u64,
}

/// B-tree handle object
pub type BTreeDb = Db<BTreeBackend>;
/// LSM handle object
pub type LsmDb = Db<LsmBackend>;
/// Relational handle object
pub type SqlDb = Db<SqlBackend>;

impl<B: Backend> Db<B> {
    pub(crate) fn new(
        env: Environment<B>,
        name: &str,
        read_only: bool,
        shared: Arc<FileShared<Pending<B>>>,
    ) -> Self {
        Self {
            env,
            name: name.to_string(),
            read_only,
            shared,
            holder: NEXT_HOLDER.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn environment(&self) -> &Environment<B> {
        &self.env
    }

    /// Whether this thread's transaction or any other is active on the file
    pub fn in_transaction(&self) -> bool {
        self.shared.slot.is_active()
    }

    /// Run `f` with the physical handle and, when the calling thread owns
    /// the file's transaction, its pending work
    fn with_handle<R>(
        &self,
        f: impl FnOnce(&B::Handle, Option<&mut Pending<B>>) -> Result<R>,
    ) -> Result<R> {
        let mut slot: SlotGuard<'_, Pending<B>> = self.shared.slot.enter();
        let handle = self.env.handle(&self.name)?;
        let _step = self.shared.lock.lock();
        f(&handle, slot.pending())
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly(self.name.clone()));
        }
        Ok(())
    }

    /// Write the version record of a newly created file
    pub(crate) fn ensure_version(&self) -> Result<()> {
        self.with_handle(|handle, _| {
            if handle.get(VERSION_KEY)?.is_none() {
                handle.put(VERSION_KEY, &encode_version(CLIENT_VERSION), true)?;
                debug!(backend = %B::KIND, file = %self.name, version = CLIENT_VERSION, "wrote version record");
            }
            Ok(())
        })
    }
}

impl<B: Backend> KeyValueStore for Db<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        B::KIND
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        self.with_handle(|handle, pending| match pending {
            Some(pending) => handle.pending_get(pending, key),
            None => handle.get(key),
        })
    }

    fn write(&self, key: &[u8], value: &[u8], overwrite: bool) -> Result<()> {
        self.check_writable()?;
        validate_key(key)?;
        validate_value(value)?;
        self.with_handle(|handle, pending| match pending {
            Some(pending) => handle.pending_put(pending, key, value, overwrite),
            None => handle.put(key, value, overwrite),
        })
    }

    fn erase(&self, key: &[u8]) -> Result<()> {
        self.check_writable()?;
        validate_key(key)?;
        self.with_handle(|handle, pending| match pending {
            Some(pending) => handle.pending_delete(pending, key),
            None => handle.delete(key),
        })
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.read(key)?.is_some())
    }

    fn begin(&self) -> Result<()> {
        if !B::KIND.supports_transactions() {
            return Err(Error::Unsupported {
                backend: B::KIND,
                operation: "begin",
            });
        }
        let handle = self.env.handle(&self.name)?;
        self.shared.slot.begin(self.holder, || handle.begin())?;
        debug!(backend = %B::KIND, file = %self.name, "began transaction");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.shared.slot.finish(|pending| {
            let handle = self.env.handle(&self.name)?;
            let _step = self.shared.lock.lock();
            handle.commit(pending)
        })
    }

    fn abort(&self) -> Result<()> {
        self.shared.slot.finish(|pending| {
            <B::Handle as FileHandle>::abort(pending);
            Ok(())
        })?;
        debug!(backend = %B::KIND, file = %self.name, "aborted transaction");
        Ok(())
    }

    fn scan_pending(&self, key: &[u8]) -> Result<BatchLookup> {
        self.with_handle(|handle, pending| match pending {
            Some(pending) => handle.scan_pending(pending, key),
            None => Err(Error::TransactionState(
                "no batch is active on this thread".into(),
            )),
        })
    }

    fn iter(&self) -> Result<DbIterator> {
        self.with_handle(|handle, _| handle.iter(Arc::clone(&self.shared.lock)))
    }
}

impl<B: Backend> Drop for Db<B> {
    fn drop(&mut self) {
        if let Some(pending) = self.shared.slot.release(self.holder) {
            warn!(backend = %B::KIND, file = %self.name, "aborting transaction of a dropped handle");
            <B::Handle as FileHandle>::abort(pending);
        }
        self.env.release(&self.name);
    }
}

impl<B: Backend> std::fmt::Debug for Db<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("kind", &B::KIND)
            .field("name", &self.name)
            .field("read_only", &self.read_only)
            .finish()
    }
}
