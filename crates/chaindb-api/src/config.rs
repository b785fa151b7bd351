//! Storage configuration
//!
//! One [`DbConfig`] describes every backend. Each environment derives its
//! engine options from it, so the options a backend runs with can always be
//! recomputed from the configuration alone.

use chaindb_btree::BTreeOptions;
use chaindb_lsm::{BlockCache, LsmOptions};
use chaindb_wal::SyncMode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Root data directory shared by every backend
    pub data_dir: PathBuf,
    /// Cache budget in MiB for each engine
    pub cache_mb: usize,
    /// The B-tree environment is not shared with other processes
    pub private_env: bool,
    /// Log volume in KiB after which a periodic checkpoint is due
    pub log_size_kb: u64,
    /// Detach every file from the log on flush, the chain file included
    pub detach_db: bool,
    /// Throwaway environment; B-tree log segments are removed on shutdown
    pub mock: bool,
    /// File kept attached to the log on flush unless `detach_db` is set
    pub chain_file: Option<String>,
    /// LSM store directories created when the LSM environment opens
    pub lsm_instances: Vec<String>,
    /// SQLite files created when the relational environment opens
    pub sql_instances: Vec<String>,
    /// Attempts to open a file before giving up
    pub open_retries: u32,
    /// Pause between open attempts
    pub open_retry_backoff: Duration,
    /// Pause between rewrite eligibility checks
    pub rewrite_poll_interval: Duration,
    /// Eligibility checks before a rewrite gives up
    pub rewrite_max_polls: u32,
    /// Durability of log appends
    pub sync_mode: SyncMode,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            cache_mb: 25,
            private_env: true,
            log_size_kb: 100,
            detach_db: false,
            mock: false,
            chain_file: None,
            lsm_instances: vec!["txleveldb".to_string()],
            sql_instances: vec!["blkindex.sqlite".to_string()],
            open_retries: 3,
            open_retry_backoff: Duration::from_secs(1),
            rewrite_poll_interval: Duration::from_millis(100),
            rewrite_max_polls: 600,
            sync_mode: SyncMode::Sync,
        }
    }
}

impl DbConfig {
    /// Default configuration rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_mb(mut self, cache_mb: usize) -> Self {
        self.cache_mb = cache_mb;
        self
    }

    pub fn with_private_env(mut self, private_env: bool) -> Self {
        self.private_env = private_env;
        self
    }

    pub fn with_detach_db(mut self, detach_db: bool) -> Self {
        self.detach_db = detach_db;
        self
    }

    pub fn with_mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    pub fn with_chain_file(mut self, name: impl Into<String>) -> Self {
        self.chain_file = Some(name.into());
        self
    }

    pub fn with_lsm_instances<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lsm_instances = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sql_instances<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sql_instances = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the open retry budget
    pub fn with_open_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.open_retries = retries.max(1);
        self.open_retry_backoff = backoff;
        self
    }

    /// Set how often and how long a rewrite waits for a file to go idle
    pub fn with_rewrite_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.rewrite_poll_interval = interval;
        self.rewrite_max_polls = max_polls;
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// B-tree environment tuning
    pub fn btree_options(&self) -> BTreeOptions {
        BTreeOptions {
            cache_mb: self.cache_mb,
            private: self.private_env,
            mock: self.mock,
            sync_mode: self.sync_mode,
            ..Default::default()
        }
    }

    /// LSM store tuning, sharing one block cache across instances
    pub fn lsm_options(&self) -> LsmOptions {
        LsmOptions {
            sync_mode: self.sync_mode,
            block_cache: Some(Arc::new(BlockCache::with_mb(self.cache_mb))),
            ..Default::default()
        }
    }
}
