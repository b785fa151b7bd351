//! Transactions on a single B-tree file
//!
//! A transaction is only a write set. Reads go through it to whichever
//! handle of the file is passed in, and commit logs the whole set as one
//! BEGIN/.../COMMIT group on that handle and then applies it, so recovery
//! sees all of it or none of it. The file may be closed and reopened while
//! a transaction is pending; the set survives and commits on the reopened
//! handle.

use crate::file::BTreeFile;
use chaindb_core::{Error, Result};
use chaindb_wal::LogRecord;
use std::collections::BTreeMap;
use tracing::debug;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// Pending writes against one file
pub struct Txn {
    file: String,
    id: u64,
    read_only: bool,
    max_locks: usize,
    state: TxnState,
    /// `None` deletes the key
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Txn {
    pub(crate) fn new(file: &BTreeFile, id: u64) -> Self {
        Self {
            file: file.name().to_string(),
            id,
            read_only: file.is_read_only(),
            max_locks: file.inner.max_locks,
            state: TxnState::Active,
            writes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Name of the file the transaction writes to
    pub fn file_name(&self) -> &str {
        &self.file
    }

    /// Number of pending writes
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    fn check_file(&self, file: &BTreeFile) -> Result<()> {
        if file.name() != self.file {
            return Err(Error::InvalidInput(format!(
                "transaction {} belongs to {}, not {}",
                self.id,
                self.file,
                file.name()
            )));
        }
        Ok(())
    }

    fn check_write(&self, key: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly(self.file.clone()));
        }
        if self.writes.len() >= self.max_locks && !self.writes.contains_key(key) {
            return Err(Error::Backend(format!(
                "transaction {} exceeds {} locks",
                self.id, self.max_locks
            )));
        }
        Ok(())
    }

    /// Read through the pending writes to `file`
    pub fn get(&self, file: &BTreeFile, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_file(file)?;
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => file.get(key),
        }
    }

    pub fn exists(&self, file: &BTreeFile, key: &[u8]) -> Result<bool> {
        Ok(self.get(file, key)?.is_some())
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_write(key)?;
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    /// Buffer a put of a key that must not exist yet in `file` or in the
    /// pending writes
    pub fn put_no_overwrite(&mut self, file: &BTreeFile, key: &[u8], value: &[u8]) -> Result<()> {
        if self.exists(file, key)? {
            return Err(Error::KeyExists);
        }
        self.put(key, value)
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_write(key)?;
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    /// Log the write set on `file`, then apply it.
    ///
    /// The transaction is finished whether or not this succeeds.
    pub fn commit(mut self, file: &BTreeFile) -> Result<()> {
        let writes = std::mem::take(&mut self.writes);
        self.state = TxnState::Aborted;
        self.check_file(file)?;
        if writes.is_empty() {
            self.state = TxnState::Committed;
            return Ok(());
        }

        let file_id = file.inner.id;
        let mut records = Vec::with_capacity(writes.len() + 2);
        records.push(LogRecord::begin(self.id));
        for (key, value) in &writes {
            records.push(match value {
                Some(value) => LogRecord::put(file_id, key.clone(), value.clone()),
                None => LogRecord::delete(file_id, key.clone()),
            });
        }
        records.push(LogRecord::commit(self.id));

        let count = writes.len();
        file.inner
            .log_and_apply(records, writes.into_iter().collect(), |_| Ok(()))?;
        self.state = TxnState::Committed;
        debug!(file = %self.file, tx = self.id, writes = count, "committed transaction");
        Ok(())
    }

    /// Discard the write set
    pub fn abort(mut self) {
        self.writes.clear();
        self.state = TxnState::Aborted;
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        if self.state == TxnState::Active && !self.writes.is_empty() {
            debug!(file = %self.file, tx = self.id, "aborting dropped transaction");
        }
    }
}

impl std::fmt::Debug for Txn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn")
            .field("file", &self.file)
            .field("id", &self.id)
            .field("state", &self.state)
            .field("writes", &self.writes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{BTreeEnv, BTreeOptions};
    use chaindb_core::{Error, OpenMode};
    use tempfile::tempdir;

    #[test]
    fn test_commit_applies_all_writes() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        let file = env.open_file("blkindex.dat", OpenMode::CREATE).unwrap();
        file.put(b"gone", b"x").unwrap();

        let mut txn = file.begin().unwrap();
        txn.put(b"a", b"1").unwrap();
        txn.put(b"b", b"2").unwrap();
        txn.delete(b"gone").unwrap();

        // Visible inside, invisible outside
        assert_eq!(txn.get(&file, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(txn.get(&file, b"gone").unwrap(), None);
        assert_eq!(file.get(b"a").unwrap(), None);

        txn.commit(&file).unwrap();
        assert_eq!(file.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(file.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(file.get(b"gone").unwrap(), None);
    }

    #[test]
    fn test_abort_discards_writes() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        let file = env.open_file("blkindex.dat", OpenMode::CREATE).unwrap();
        file.put(b"k", b"old").unwrap();

        let mut txn = file.begin().unwrap();
        txn.put(b"k", b"new").unwrap();
        txn.abort();

        assert_eq!(file.get(b"k").unwrap(), Some(b"old".to_vec()));
    }

    #[test]
    fn test_no_overwrite_sees_pending_writes() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        let file = env.open_file("blkindex.dat", OpenMode::CREATE).unwrap();

        let mut txn = file.begin().unwrap();
        txn.put_no_overwrite(&file, b"k", b"1").unwrap();
        assert!(matches!(
            txn.put_no_overwrite(&file, b"k", b"2"),
            Err(Error::KeyExists)
        ));
    }

    #[test]
    fn test_lock_limit() {
        let dir = tempdir().unwrap();
        let options = BTreeOptions {
            max_locks: 2,
            ..Default::default()
        };
        let env = BTreeEnv::open(dir.path(), options).unwrap();
        let file = env.open_file("blkindex.dat", OpenMode::CREATE).unwrap();

        let mut txn = file.begin().unwrap();
        txn.put(b"a", b"1").unwrap();
        txn.put(b"b", b"2").unwrap();
        txn.put(b"a", b"again").unwrap();
        assert!(txn.put(b"c", b"3").is_err());
    }

    #[test]
    fn test_survives_close_and_reopen() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
        file.put(b"k", b"old").unwrap();

        let mut txn = file.begin().unwrap();
        txn.put(b"a", b"1").unwrap();
        drop(file);
        env.close_file("wallet.dat").unwrap();

        let file = env.open_file("wallet.dat", OpenMode::READ_WRITE).unwrap();
        assert_eq!(txn.get(&file, b"k").unwrap(), Some(b"old".to_vec()));
        txn.commit(&file).unwrap();
        assert_eq!(file.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_commit_refuses_other_file() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        let wallet = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
        let addr = env.open_file("addr.dat", OpenMode::CREATE).unwrap();

        let mut txn = wallet.begin().unwrap();
        txn.put(b"a", b"1").unwrap();
        assert!(matches!(txn.commit(&addr), Err(Error::InvalidInput(_))));
        assert_eq!(addr.get(b"a").unwrap(), None);
        assert_eq!(wallet.get(b"a").unwrap(), None);
    }
}
