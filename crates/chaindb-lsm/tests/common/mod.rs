// Common test utilities for LSM store integration tests

use chaindb_lsm::{CompactionConfig, LsmOptions, LsmStore};
use std::path::PathBuf;
use tempfile::TempDir;

/// Test fixture holding a scratch directory for one store
pub struct LsmTestFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub store_path: PathBuf,
}

impl LsmTestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store_path = temp_dir.path().join("txleveldb");
        Self {
            temp_dir,
            store_path,
        }
    }

    pub fn open(&self) -> LsmStore {
        LsmStore::open(&self.store_path).expect("Failed to open store")
    }

    /// Small memtable and an eager compaction trigger
    #[allow(dead_code)]
    pub fn open_small(&self) -> LsmStore {
        let options = LsmOptions {
            memtable_size: 512,
            compaction: CompactionConfig {
                level0_trigger: 2,
                target_file_size: 1024,
            },
            ..Default::default()
        };
        LsmStore::open_with_options(&self.store_path, options).expect("Failed to open store")
    }
}

impl Default for LsmTestFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
pub fn key(i: usize) -> Vec<u8> {
    format!("key{:05}", i).into_bytes()
}

#[allow(dead_code)]
pub fn value(i: usize) -> Vec<u8> {
    format!("value{}", i).into_bytes()
}
