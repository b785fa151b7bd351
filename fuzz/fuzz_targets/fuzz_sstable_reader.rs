#![no_main]

use chaindb_lsm::sstable::{table_file_name, SSTableReader};
use libfuzzer_sys::fuzz_target;
use std::fs;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10_000_000 {
        return;
    }

    // Write to a scratch directory and try to open it as table 1
    if let Ok(dir) = tempfile::tempdir() {
        if fs::write(dir.path().join(table_file_name(1)), data).is_ok() {
            if let Ok(reader) = SSTableReader::open(dir.path(), 1) {
                let _ = reader.verify();
            }
        }
    }
});
