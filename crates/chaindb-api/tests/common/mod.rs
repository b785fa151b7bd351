// Common test utilities for storage integration tests

use chaindb::{DbConfig, KeyValueStore, OpenMode, Storage};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

pub const BTREE_FILE: &str = "wallet.dat";
pub const LSM_FILE: &str = "txleveldb";
pub const SQL_FILE: &str = "blkindex.sqlite";

/// Test fixture holding a scratch data directory and a storage over it
pub struct StorageFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub storage: Storage,
}

impl StorageFixture {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Fixture whose configuration is adjusted by `tweak`
    pub fn with_config(tweak: impl FnOnce(DbConfig) -> DbConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let storage = Storage::new(tweak(test_config(&root)));
        Self {
            temp_dir,
            root,
            storage,
        }
    }

    /// A fresh storage over the same directory, as after a restart
    #[allow(dead_code)]
    pub fn restart(&mut self) {
        self.storage
            .shutdown()
            .expect("Failed to shut down storage");
        self.storage = Storage::new(test_config(&self.root));
    }

    /// One writable, created handle per backend
    #[allow(dead_code)]
    pub fn open_all(&self, mode: OpenMode) -> Vec<Box<dyn KeyValueStore>> {
        vec![
            Box::new(self.storage.btree().create(BTREE_FILE, mode).expect("btree")),
            Box::new(self.storage.lsm().create(LSM_FILE, mode).expect("lsm")),
            Box::new(self.storage.sql().create(SQL_FILE, mode).expect("sql")),
        ]
    }

    /// Handles of the backends that support transactions
    #[allow(dead_code)]
    pub fn open_transactional(&self) -> Vec<Box<dyn KeyValueStore>> {
        self.open_all(OpenMode::CREATE)
            .into_iter()
            .filter(|db| db.kind().supports_transactions())
            .collect()
    }
}

impl Default for StorageFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration with short retry and polling delays
pub fn test_config(root: &std::path::Path) -> DbConfig {
    DbConfig::new(root)
        .with_cache_mb(1)
        .with_open_retries(2, Duration::from_millis(5))
        .with_rewrite_polling(Duration::from_millis(10), 50)
}
