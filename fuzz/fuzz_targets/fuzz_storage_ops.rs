#![no_main]

use arbitrary::Arbitrary;
use chaindb::{DbConfig, KeyValueStore, Storage};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum DbOp {
    Write { key: Vec<u8>, value: Vec<u8>, overwrite: bool },
    Read { key: Vec<u8> },
    Erase { key: Vec<u8> },
    Begin,
    Commit,
    Abort,
    Iterate,
}

fuzz_target!(|ops: Vec<DbOp>| {
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let storage = Storage::new(DbConfig::new(dir.path()).with_cache_mb(1));
    let Ok(db) = storage.open_lsm("fuzz", "cr+") else {
        return;
    };

    for op in ops.iter().take(100) {
        match op {
            DbOp::Write { key, value, overwrite } => {
                if key.len() <= 1024 && value.len() <= 1024 {
                    let _ = db.write(key, value, *overwrite);
                }
            }
            DbOp::Read { key } => {
                if key.len() <= 1024 {
                    let _ = db.read(key);
                }
            }
            DbOp::Erase { key } => {
                if key.len() <= 1024 {
                    let _ = db.erase(key);
                }
            }
            DbOp::Begin => {
                let _ = db.begin();
            }
            DbOp::Commit => {
                let _ = db.commit();
            }
            DbOp::Abort => {
                let _ = db.abort();
            }
            DbOp::Iterate => {
                if let Ok(iter) = db.iter() {
                    for record in iter.take(100) {
                        let _ = record;
                    }
                }
            }
        }
    }

    drop(db);
    let _ = storage.shutdown();
});
