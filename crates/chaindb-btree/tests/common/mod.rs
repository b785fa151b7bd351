// Common test utilities for B-tree environment integration tests

use chaindb_btree::{BTreeEnv, BTreeOptions, LOG_DIR};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Test fixture holding a scratch environment root
pub struct EnvTestFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub root: PathBuf,
}

impl EnvTestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        Self { temp_dir, root }
    }

    pub fn open(&self) -> BTreeEnv {
        BTreeEnv::open(&self.root, BTreeOptions::default()).expect("Failed to open environment")
    }

    /// Drop the environment without writing anything back
    #[allow(dead_code)]
    pub fn crash(&self, env: BTreeEnv) {
        std::mem::forget(env);
    }

    #[allow(dead_code)]
    pub fn log_segments(&self) -> usize {
        fs::read_dir(self.root.join(LOG_DIR))
            .expect("Failed to read log directory")
            .count()
    }
}

impl Default for EnvTestFixture {
    fn default() -> Self {
        Self::new()
    }
}
