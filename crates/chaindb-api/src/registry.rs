//! File handle registry
//!
//! Tracks, per logical file name, the cached physical handle, the number
//! of outstanding acquisitions (the use count) and the state every handle
//! object on that file shares. The registry is owned by an environment and
//! only touched under the environment lock.
//!
//! The use count counts callers, not physical handles: a file can be
//! closed while acquired and is reopened on its next use.

use crate::backend::FileHandle;
use crate::txn::TxnSlot;
use chaindb_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// State shared by every handle object on one file
pub(crate) struct FileShared<P> {
    /// Serializes single operations and iterator steps on the file
    pub(crate) lock: Arc<Mutex<()>>,
    pub(crate) slot: TxnSlot<P>,
}

impl<P> FileShared<P> {
    fn new() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            slot: TxnSlot::new(),
        }
    }
}

struct FileEntry<H: FileHandle> {
    handle: Option<H>,
    use_count: i64,
    shared: Arc<FileShared<H::Pending>>,
}

impl<H: FileHandle> FileEntry<H> {
    fn new() -> Self {
        Self {
            handle: None,
            use_count: 0,
            shared: Arc::new(FileShared::new()),
        }
    }
}

pub(crate) struct Registry<H: FileHandle> {
    files: HashMap<String, FileEntry<H>>,
}

impl<H: FileHandle> Registry<H> {
    pub(crate) fn new() -> Self {
        Self {
            files: HashMap::new(),
        }
    }

    /// Count one more acquisition of `name` and return its shared state
    pub(crate) fn acquire(&mut self, name: &str) -> Arc<FileShared<H::Pending>> {
        let entry = self
            .files
            .entry(name.to_string())
            .or_insert_with(FileEntry::new);
        entry.use_count += 1;
        Arc::clone(&entry.shared)
    }

    pub(crate) fn inc_use_count(&mut self, name: &str) -> i64 {
        let entry = self
            .files
            .entry(name.to_string())
            .or_insert_with(FileEntry::new);
        entry.use_count += 1;
        entry.use_count
    }

    /// Count one release of `name`; releasing more than was acquired is a
    /// bug in the caller
    pub(crate) fn dec_use_count(&mut self, name: &str) -> Result<i64> {
        let count = self.use_count(name);
        debug_assert!(count > 0, "use count of {} driven below zero", name);
        match self.files.get_mut(name) {
            Some(entry) if entry.use_count > 0 => {
                entry.use_count -= 1;
                Ok(entry.use_count)
            }
            _ => Err(Error::UseCount {
                name: name.to_string(),
                count: count - 1,
            }),
        }
    }

    pub(crate) fn use_count(&self, name: &str) -> i64 {
        self.files.get(name).map(|e| e.use_count).unwrap_or(0)
    }

    /// Whether `name` is tracked at all
    pub(crate) fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Forget `name`, returning its cached handle for the caller to close
    pub(crate) fn erase(&mut self, name: &str) -> Option<H> {
        self.files.remove(name).and_then(|e| e.handle)
    }

    pub(crate) fn handle(&self, name: &str) -> Option<H> {
        self.files.get(name).and_then(|e| e.handle.clone())
    }

    pub(crate) fn set_handle(&mut self, name: &str, handle: H) {
        self.files
            .entry(name.to_string())
            .or_insert_with(FileEntry::new)
            .handle = Some(handle);
    }

    pub(crate) fn take_handle(&mut self, name: &str) -> Option<H> {
        self.files.get_mut(name).and_then(|e| e.handle.take())
    }

    /// Every cached handle
    pub(crate) fn handles(&self) -> Vec<H> {
        self.files
            .values()
            .filter_map(|e| e.handle.clone())
            .collect()
    }

    /// Remove every cached handle, leaving use counts alone
    pub(crate) fn take_handles(&mut self) -> Vec<(String, H)> {
        self.files
            .iter_mut()
            .filter_map(|(name, e)| e.handle.take().map(|h| (name.clone(), h)))
            .collect()
    }

    /// Tracked names, sorted
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
