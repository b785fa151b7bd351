// Multi-threaded access to shared files

mod common;

use chaindb::{Error, KeyValueStore};
use common::{StorageFixture, BTREE_FILE, LSM_FILE};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_other_threads_wait_for_commit() {
    let fixture = StorageFixture::new();
    let owner = fixture.storage.open_btree(BTREE_FILE, "cr+").unwrap();
    let other = fixture.storage.open_btree(BTREE_FILE, "r+").unwrap();

    owner.begin().unwrap();
    owner.write(b"k", b"from-owner", true).unwrap();

    let writer = thread::spawn(move || {
        other.write(b"k", b"from-other", true).unwrap();
        other
    });
    thread::sleep(Duration::from_millis(50));
    assert!(!writer.is_finished());

    owner.commit().unwrap();
    let other = writer.join().unwrap();
    assert_eq!(owner.read(b"k").unwrap(), Some(b"from-other".to_vec()));
    assert_eq!(other.read(b"k").unwrap(), Some(b"from-other".to_vec()));
}

#[test]
fn test_begin_elsewhere_fails_immediately() {
    let fixture = StorageFixture::new();
    let owner = fixture.storage.open_lsm(LSM_FILE, "cr+").unwrap();
    let other = fixture.storage.open_lsm(LSM_FILE, "r+").unwrap();
    owner.begin().unwrap();

    let result = thread::spawn(move || other.begin()).join().unwrap();
    assert!(matches!(result, Err(Error::TransactionState(_))));
    owner.abort().unwrap();
}

#[test]
fn test_threads_with_own_handles() {
    let fixture = StorageFixture::new();
    let env = fixture.storage.lsm().clone();
    drop(fixture.storage.open_lsm(LSM_FILE, "cr+").unwrap());

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let storage = fixture.storage.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let db = storage.open_lsm(LSM_FILE, "r+").unwrap();
                barrier.wait();
                for i in 0..100u32 {
                    let key = format!("t{}:{:03}", t, i);
                    db.write(key.as_bytes(), &i.to_le_bytes(), true).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(env.use_count(LSM_FILE), 0);
    let db = fixture.storage.open_lsm(LSM_FILE, "r").unwrap();
    let count = db.iter().unwrap().count();
    assert_eq!(count, threads * 100 + 1);
}

#[test]
fn test_transactions_from_many_threads_serialize() {
    let fixture = StorageFixture::new();
    drop(fixture.storage.open_btree(BTREE_FILE, "cr+").unwrap());

    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let storage = fixture.storage.clone();
            thread::spawn(move || {
                let db = storage.open_btree(BTREE_FILE, "r+").unwrap();
                for round in 0..10u32 {
                    loop {
                        match db.begin() {
                            Ok(()) => break,
                            Err(Error::TransactionState(_)) => thread::yield_now(),
                            Err(e) => panic!("begin failed: {}", e),
                        }
                    }
                    let counter = db
                        .read(b"counter")
                        .unwrap()
                        .map(|raw| u32::from_le_bytes(raw.try_into().unwrap()))
                        .unwrap_or(0);
                    db.write(b"counter", &(counter + 1).to_le_bytes(), true)
                        .unwrap();
                    db.write(format!("t{}:{}", t, round).as_bytes(), b"done", true)
                        .unwrap();
                    db.commit().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let db = fixture.storage.open_btree(BTREE_FILE, "r").unwrap();
    assert_eq!(db.read(b"counter").unwrap(), Some(40u32.to_le_bytes().to_vec()));
}

#[test]
fn test_iteration_alongside_writes() {
    let fixture = StorageFixture::new();
    let db = Arc::new(fixture.storage.open_btree(BTREE_FILE, "cr+").unwrap());
    for i in 0..200u32 {
        db.write(&i.to_be_bytes(), b"v", true).unwrap();
    }

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for i in 200..400u32 {
                db.write(&i.to_be_bytes(), b"v", true).unwrap();
            }
        })
    };

    let mut previous: Option<Vec<u8>> = None;
    for record in db.iter().unwrap() {
        let (key, _) = record.unwrap();
        if let Some(previous) = &previous {
            assert!(previous < &key);
        }
        previous = Some(key);
    }
    writer.join().unwrap();
    assert_eq!(db.iter().unwrap().count(), 401);
}
