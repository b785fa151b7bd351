// Shared fixture for the log integration tests

use chaindb_wal::{LogRecord, Wal, WalOptions};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct LogDir {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl LogDir {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("database");
        Self { temp_dir, path }
    }

    pub fn options(&self) -> WalOptions {
        WalOptions::new(&self.path)
    }

    pub fn open(&self) -> Wal {
        Wal::open(self.options()).expect("Failed to open log")
    }

    #[allow(dead_code)]
    pub fn segment_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.path)
            .expect("Failed to read log directory")
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        files.sort();
        files
    }
}

impl Default for LogDir {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
pub fn put(file: u64, i: usize) -> LogRecord {
    LogRecord::put(
        file,
        format!("key{}", i).into_bytes(),
        format!("value{}", i).into_bytes(),
    )
}
