//! B-tree environment
//!
//! One environment owns a root directory, the shared write-ahead log under
//! `<root>/database/` and every open file. Page files live directly in the
//! root. Opening the environment replays committed log records into the
//! page files they belong to.

use crate::file::{file_id, BTreeFile, FileInner, Tree};
use crate::page::{is_page_file, read_page_file, write_page_file};
use crate::salvage::salvage_file;
use chaindb_core::{Error, OpenMode, Result};
use chaindb_wal::{LogEntry, LogRecord, SyncMode, Wal, WalOptions};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Log directory under the root
pub const LOG_DIR: &str = "database";
/// Error log file under the root
pub const ERROR_LOG: &str = "db.log";

/// Environment tuning
#[derive(Debug, Clone)]
pub struct BTreeOptions {
    /// Page cache budget in MiB
    pub cache_mb: usize,
    /// Log buffer size in bytes
    pub log_buffer_size: usize,
    /// Log segment size in bytes before rotation
    pub log_max_segment: u64,
    /// Maximum keys one transaction may write
    pub max_locks: usize,
    /// Maximum files open at once
    pub max_lock_objects: usize,
    /// The environment is not shared with other processes
    pub private: bool,
    /// Throwaway environment; the log directory is removed on close
    pub mock: bool,
    pub sync_mode: SyncMode,
}

impl Default for BTreeOptions {
    fn default() -> Self {
        Self {
            cache_mb: 25,
            log_buffer_size: 1024 * 1024,
            log_max_segment: 10 * 1024 * 1024,
            max_locks: 537_000,
            max_lock_objects: 10_000,
            private: true,
            mock: false,
            sync_mode: SyncMode::Sync,
        }
    }
}

struct CheckpointState {
    bytes_at_last: u64,
    at: Instant,
}

/// State shared by the environment and its files
///
/// Lock order: checkpoint, wal, files, a file's tree.
struct EnvShared {
    root: PathBuf,
    options: BTreeOptions,
    wal: Arc<Mutex<Wal>>,
    files: Mutex<HashMap<String, Arc<FileInner>>>,
    checkpoint: Mutex<CheckpointState>,
    next_tx: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl Drop for EnvShared {
    fn drop(&mut self) {
        if *self.closed.get_mut() {
            return;
        }
        // Dropped without close: everything is in the log already, but
        // writing the files back keeps recovery short
        for file in self.files.get_mut().values() {
            let mut tree = file.tree.write();
            let lsn = tree.lsn;
            if let Err(e) = file.persist(&mut tree, lsn) {
                warn!(file = %file.name, error = %e, "failed to write back file on drop");
            }
        }
        if let Err(e) = self.wal.lock().sync() {
            warn!(error = %e, "failed to sync log on drop");
        }
    }
}

/// Handle to an open B-tree environment
#[derive(Clone)]
pub struct BTreeEnv {
    shared: Arc<EnvShared>,
}

impl BTreeEnv {
    /// Open the environment at `root`, creating its layout and recovering
    /// any log records not yet in their page files
    pub fn open(root: impl AsRef<Path>, options: BTreeOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let log_dir = root.join(LOG_DIR);
        fs::create_dir_all(&log_dir)?;

        let wal = Wal::open(
            WalOptions::new(log_dir)
                .with_sync_mode(options.sync_mode)
                .with_segment_bytes(options.log_max_segment),
        )?;
        let replayed = recover(&root, &wal)?;
        let next_tx = wal.last_lsn() + 1;

        info!(
            root = %root.display(),
            cache_mb = options.cache_mb,
            private = options.private,
            mock = options.mock,
            replayed,
            "opened B-tree environment"
        );

        Ok(Self {
            shared: Arc::new(EnvShared {
                root,
                options,
                wal: Arc::new(Mutex::new(wal)),
                files: Mutex::new(HashMap::new()),
                checkpoint: Mutex::new(CheckpointState {
                    bytes_at_last: 0,
                    at: Instant::now(),
                }),
                next_tx: Arc::new(AtomicU64::new(next_tx)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    pub fn log_dir(&self) -> PathBuf {
        self.shared.root.join(LOG_DIR)
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.shared.root.join(ERROR_LOG)
    }

    pub fn options(&self) -> &BTreeOptions {
        &self.shared.options
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        let bad = name.is_empty()
            || name == LOG_DIR
            || name == ERROR_LOG
            || name.contains(['/', '\\'])
            || name == "."
            || name == "..";
        if bad {
            return Err(Error::InvalidInput(format!("bad file name {:?}", name)));
        }
        Ok(self.shared.root.join(name))
    }

    /// Open a file, creating it when `mode` allows
    pub fn open_file(&self, name: &str, mode: OpenMode) -> Result<BTreeFile> {
        self.ensure_open()?;
        let path = self.path_of(name)?;

        let wal = self.shared.wal.lock();
        let mut files = self.shared.files.lock();
        if let Some(inner) = files.get(name) {
            return Ok(BTreeFile::new(Arc::clone(inner), mode.read_only));
        }
        if files.len() >= self.shared.options.max_lock_objects {
            return Err(Error::Backend(format!(
                "cannot open {}: {} files already open",
                name,
                files.len()
            )));
        }

        let last_lsn = wal.last_lsn();
        let tree = if path.exists() {
            let (header, entries) = read_page_file(&path)?;
            let mut lsn = header.lsn;
            // A detached image, or one from a log that no longer exists,
            // is tied to the current log before anyone can write to it
            if header.detached || header.lsn > last_lsn {
                write_page_file(&path, &entries, last_lsn, false)?;
                lsn = last_lsn;
            }
            Tree {
                entries,
                lsn,
                dirty: false,
                closed: false,
            }
        } else if mode.create {
            let entries = Default::default();
            write_page_file(&path, &entries, last_lsn, false)?;
            debug!(file = name, "created B-tree file");
            Tree {
                entries,
                lsn: last_lsn,
                dirty: false,
                closed: false,
            }
        } else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", name),
            )));
        };

        let inner = Arc::new(FileInner {
            name: name.to_string(),
            id: file_id(name),
            path,
            wal: Arc::clone(&self.shared.wal),
            next_tx: Arc::clone(&self.shared.next_tx),
            max_locks: self.shared.options.max_locks,
            tree: RwLock::new(tree),
        });
        files.insert(name.to_string(), Arc::clone(&inner));
        Ok(BTreeFile::new(inner, mode.read_only))
    }

    /// Whether the environment has `name` open
    pub fn is_file_open(&self, name: &str) -> bool {
        self.shared.files.lock().contains_key(name)
    }

    /// Names of every open file
    pub fn open_files(&self) -> Vec<String> {
        self.shared.files.lock().keys().cloned().collect()
    }

    /// Whether a page file called `name` exists
    pub fn file_exists(&self, name: &str) -> bool {
        self.path_of(name).map(|p| p.exists()).unwrap_or(false)
    }

    /// Write the file back and close it; outstanding handles stop working
    pub fn close_file(&self, name: &str) -> Result<()> {
        let _wal = self.shared.wal.lock();
        let inner = match self.shared.files.lock().remove(name) {
            Some(inner) => inner,
            None => return Ok(()),
        };
        let mut tree = inner.tree.write();
        let lsn = tree.lsn;
        inner.persist(&mut tree, lsn)?;
        tree.closed = true;
        debug!(file = name, "closed B-tree file");
        Ok(())
    }

    fn ensure_closed(&self, name: &str) -> Result<()> {
        if let Some(inner) = self.shared.files.lock().get(name) {
            return Err(Error::UseCount {
                name: name.to_string(),
                count: Arc::strong_count(inner) as i64 - 1,
            });
        }
        Ok(())
    }

    /// Checkpoint when `kbytes` KiB of log were written or `minutes`
    /// passed since the last one; `0, 0` always checkpoints.
    ///
    /// Every open file is written back and log segments no page file
    /// depends on any more are deleted. Returns whether it ran.
    pub fn checkpoint(&self, kbytes: u64, minutes: u64) -> Result<bool> {
        self.ensure_open()?;
        let mut state = self.shared.checkpoint.lock();
        let mut wal = self.shared.wal.lock();

        let written = wal.bytes_written().saturating_sub(state.bytes_at_last);
        let forced = kbytes == 0 && minutes == 0;
        let due = forced
            || (kbytes > 0 && written >= kbytes * 1024)
            || (minutes > 0 && state.at.elapsed() >= Duration::from_secs(minutes * 60));
        if !due {
            return Ok(false);
        }

        self.run_checkpoint(&mut state, &mut wal)?;
        Ok(true)
    }

    fn run_checkpoint(&self, state: &mut CheckpointState, wal: &mut Wal) -> Result<()> {
        let boundary = wal.rotate()?;
        let covered = boundary.saturating_sub(1);
        let files: Vec<Arc<FileInner>> = self.shared.files.lock().values().cloned().collect();
        for file in &files {
            let mut tree = file.tree.write();
            file.persist(&mut tree, covered)?;
        }
        wal.append(LogRecord::checkpoint(covered))?;
        wal.sync()?;
        let removed = wal.remove_before(boundary)?;

        state.bytes_at_last = wal.bytes_written();
        state.at = Instant::now();
        debug!(
            lsn = covered,
            files = files.len(),
            segments_removed = removed,
            "checkpoint"
        );
        Ok(())
    }

    /// Mark a closed file as independent of the log
    pub fn lsn_reset(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let path = self.path_of(name)?;
        let _wal = self.shared.wal.lock();
        self.ensure_closed(name)?;
        if !path.exists() {
            return Ok(());
        }
        let (header, entries) = read_page_file(&path)?;
        if !header.detached {
            write_page_file(&path, &entries, header.lsn, true)?;
        }
        debug!(file = name, "detached from log");
        Ok(())
    }

    /// Check a closed file's structure; returns its record count
    pub fn verify(&self, name: &str) -> Result<usize> {
        let path = self.path_of(name)?;
        self.ensure_closed(name)?;
        let (_, entries) = read_page_file(&path)?;
        Ok(entries.len())
    }

    /// Dump the readable records of a closed file
    pub fn salvage(&self, name: &str, aggressive: bool) -> Result<String> {
        let path = self.path_of(name)?;
        self.ensure_closed(name)?;
        salvage_file(&path, aggressive)
    }

    /// Delete a closed file
    pub fn remove_file(&self, name: &str) -> Result<()> {
        let path = self.path_of(name)?;
        let _wal = self.shared.wal.lock();
        self.ensure_closed(name)?;
        fs::remove_file(&path)?;
        info!(file = name, "removed B-tree file");
        Ok(())
    }

    /// Rename a closed file, replacing any file called `to`
    pub fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.path_of(from)?;
        let to_path = self.path_of(to)?;
        let wal = self.shared.wal.lock();
        self.ensure_closed(from)?;
        self.ensure_closed(to)?;

        // Records logged under the new name before now belong to an older file
        let (_, entries) = read_page_file(&from_path)?;
        write_page_file(&from_path, &entries, wal.last_lsn(), false)?;
        fs::rename(&from_path, &to_path)?;
        info!(from, to, "renamed B-tree file");
        Ok(())
    }

    /// Write every open file back and drop all log segments before the
    /// current one
    pub fn remove_log_segments(&self) -> Result<usize> {
        self.ensure_open()?;
        let mut state = self.shared.checkpoint.lock();
        let mut wal = self.shared.wal.lock();
        self.run_checkpoint(&mut state, &mut wal)?;
        wal.reclaim()
    }

    /// Write back and close every file, then close the log.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut wal = self.shared.wal.lock();
        let files: Vec<Arc<FileInner>> = self.shared.files.lock().drain().map(|(_, f)| f).collect();
        for file in &files {
            let mut tree = file.tree.write();
            let lsn = tree.lsn;
            file.persist(&mut tree, lsn)?;
            tree.closed = true;
        }
        wal.close()?;
        drop(wal);

        if self.shared.options.mock {
            let log_dir = self.log_dir();
            if let Err(e) = fs::remove_dir_all(&log_dir) {
                warn!(path = %log_dir.display(), error = %e, "failed to remove mock log directory");
            }
        }

        info!(root = %self.shared.root.display(), files = files.len(), "closed B-tree environment");
        Ok(())
    }
}

impl std::fmt::Debug for BTreeEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeEnv")
            .field("root", &self.shared.root)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Replay committed log records into the page files they belong to.
///
/// Returns the number of records applied.
fn recover(root: &Path, wal: &Wal) -> Result<usize> {
    let mut by_file: HashMap<u64, Vec<LogRecord>> = HashMap::new();
    for record in wal.replay()?.records {
        if let Some(id) = record.entry.file() {
            by_file.entry(id).or_default().push(record);
        }
    }
    if by_file.is_empty() {
        return Ok(0);
    }

    let mut applied = 0;
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_file() || !is_page_file(&path) {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let records = match by_file.remove(&file_id(&name)) {
            Some(records) => records,
            None => continue,
        };

        let (header, mut entries) = read_page_file(&path)?;
        if header.detached {
            continue;
        }
        let mut lsn = header.lsn;
        let mut count = 0;
        for record in records.into_iter().filter(|r| r.lsn > header.lsn) {
            lsn = lsn.max(record.lsn);
            match record.entry {
                LogEntry::Put { key, value, .. } => {
                    entries.insert(key, value);
                }
                LogEntry::Delete { key, .. } => {
                    entries.remove(&key);
                }
                _ => continue,
            }
            count += 1;
        }
        if count > 0 {
            write_page_file(&path, &entries, lsn, false)?;
            info!(file = %name, records = count, "recovered B-tree file from log");
            applied += count;
        }
    }

    if !by_file.is_empty() {
        debug!(files = by_file.len(), "log holds records for files that no longer exist");
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_layout() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        assert!(dir.path().join(LOG_DIR).is_dir());
        assert_eq!(env.error_log_path(), dir.path().join(ERROR_LOG));
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        assert!(env.open_file("absent.dat", OpenMode::READ_WRITE).is_err());
        assert!(!env.file_exists("absent.dat"));
    }

    #[test]
    fn test_rejects_bad_names() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        for name in ["", "..", "a/b", LOG_DIR, ERROR_LOG] {
            assert!(env.open_file(name, OpenMode::CREATE).is_err(), "{:?}", name);
        }
    }

    #[test]
    fn test_maintenance_refused_while_open() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        let _file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();

        assert!(matches!(
            env.verify("wallet.dat"),
            Err(Error::UseCount { .. })
        ));
        assert!(env.remove_file("wallet.dat").is_err());

        env.close_file("wallet.dat").unwrap();
        assert_eq!(env.verify("wallet.dat").unwrap(), 0);
    }

    #[test]
    fn test_checkpoint_thresholds() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
        file.put(b"k", b"v").unwrap();

        // Far below 1 MiB and 60 minutes
        assert!(!env.checkpoint(1024, 60).unwrap());
        assert!(env.checkpoint(0, 0).unwrap());
    }

    #[test]
    fn test_closed_environment_refuses_work() {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        env.close().unwrap();
        env.close().unwrap();
        assert!(matches!(
            env.open_file("wallet.dat", OpenMode::CREATE),
            Err(Error::ShuttingDown)
        ));
    }

    #[test]
    fn test_mock_close_removes_log_dir() {
        let dir = tempdir().unwrap();
        let options = BTreeOptions {
            mock: true,
            ..Default::default()
        };
        let env = BTreeEnv::open(dir.path(), options).unwrap();
        env.close().unwrap();
        assert!(!dir.path().join(LOG_DIR).exists());
    }
}
