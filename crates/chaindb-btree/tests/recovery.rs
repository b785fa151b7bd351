// Crash recovery and maintenance tests for the B-tree environment

mod common;

use chaindb_btree::{CursorOp, HEADER_END};
use chaindb_core::{Error, OpenMode};
use common::EnvTestFixture;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;

#[test]
fn test_auto_commit_writes_survive_crash() {
    let fixture = EnvTestFixture::new();
    {
        let env = fixture.open();
        let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
        file.put(b"a", b"1").unwrap();
        file.put(b"b", b"2").unwrap();
        file.delete(b"a").unwrap();
        drop(file);
        fixture.crash(env);
    }

    let env = fixture.open();
    let file = env.open_file("wallet.dat", OpenMode::READ).unwrap();
    assert_eq!(file.get(b"a").unwrap(), None);
    assert_eq!(file.get(b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_committed_transaction_survives_crash() {
    let fixture = EnvTestFixture::new();
    {
        let env = fixture.open();
        let file = env.open_file("blkindex.dat", OpenMode::CREATE).unwrap();
        let mut txn = file.begin().unwrap();
        for i in 0..20u32 {
            txn.put(&i.to_be_bytes(), b"tx").unwrap();
        }
        txn.commit(&file).unwrap();

        // Never committed
        let mut pending = file.begin().unwrap();
        pending.put(b"pending", b"lost").unwrap();
        drop(pending);
        drop(file);
        fixture.crash(env);
    }

    let env = fixture.open();
    let file = env.open_file("blkindex.dat", OpenMode::READ).unwrap();
    assert_eq!(file.len().unwrap(), 20);
    assert_eq!(file.get(b"pending").unwrap(), None);
}

#[test]
fn test_checkpoint_reclaims_log() {
    let fixture = EnvTestFixture::new();
    let env = fixture.open();
    let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
    for i in 0..50u32 {
        file.put(&i.to_be_bytes(), b"value").unwrap();
    }

    assert!(env.checkpoint(0, 0).unwrap());
    assert_eq!(fixture.log_segments(), 1);

    // The page file alone holds everything now
    drop(file);
    fixture.crash(env);
    let env = fixture.open();
    let file = env.open_file("wallet.dat", OpenMode::READ).unwrap();
    assert_eq!(file.len().unwrap(), 50);
}

#[test]
fn test_writes_after_checkpoint_recover() {
    let fixture = EnvTestFixture::new();
    {
        let env = fixture.open();
        let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
        file.put(b"before", b"1").unwrap();
        env.checkpoint(0, 0).unwrap();
        file.put(b"after", b"2").unwrap();
        drop(file);
        fixture.crash(env);
    }

    let env = fixture.open();
    let file = env.open_file("wallet.dat", OpenMode::READ).unwrap();
    assert_eq!(file.get(b"before").unwrap(), Some(b"1".to_vec()));
    assert_eq!(file.get(b"after").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_clean_close_and_reopen() {
    let fixture = EnvTestFixture::new();
    {
        let env = fixture.open();
        let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
        file.put(b"k", b"v").unwrap();
        env.close().unwrap();
    }

    let env = fixture.open();
    let file = env.open_file("wallet.dat", OpenMode::READ_WRITE).unwrap();
    assert_eq!(file.get(b"k").unwrap(), Some(b"v".to_vec()));
    file.put(b"k2", b"v2").unwrap();
}

#[test]
fn test_detach_rename_and_reopen() {
    let fixture = EnvTestFixture::new();
    let env = fixture.open();
    let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
    file.put(b"k", b"v").unwrap();
    drop(file);

    env.close_file("wallet.dat").unwrap();
    env.lsn_reset("wallet.dat").unwrap();
    env.rename_file("wallet.dat", "wallet.bak").unwrap();

    assert!(!env.file_exists("wallet.dat"));
    let file = env.open_file("wallet.bak", OpenMode::READ_WRITE).unwrap();
    assert_eq!(file.get(b"k").unwrap(), Some(b"v".to_vec()));

    // Writes after reattaching are recovered again
    file.put(b"k2", b"v2").unwrap();
    drop(file);
    fixture.crash(env);

    let env = fixture.open();
    let file = env.open_file("wallet.bak", OpenMode::READ).unwrap();
    assert_eq!(file.get(b"k2").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn test_recreated_file_ignores_old_records() {
    let fixture = EnvTestFixture::new();
    {
        let env = fixture.open();
        let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
        file.put(b"old", b"1").unwrap();
        drop(file);
        env.close_file("wallet.dat").unwrap();
        env.remove_file("wallet.dat").unwrap();

        let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
        file.put(b"new", b"2").unwrap();
        drop(file);
        fixture.crash(env);
    }

    let env = fixture.open();
    let file = env.open_file("wallet.dat", OpenMode::READ).unwrap();
    assert_eq!(file.get(b"old").unwrap(), None);
    assert_eq!(file.get(b"new").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_verify_and_salvage_corrupted_file() {
    let fixture = EnvTestFixture::new();
    let env = fixture.open();
    let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
    for i in 0..10u8 {
        file.put(&[b'k', i], &[i; 16]).unwrap();
    }
    drop(file);
    env.close_file("wallet.dat").unwrap();
    assert_eq!(env.verify("wallet.dat").unwrap(), 10);

    // Chop the tail: the last record and the checksum go
    let path = fixture.root.join("wallet.dat");
    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..data.len() - 10]).unwrap();

    assert!(matches!(env.verify("wallet.dat"), Err(Error::Corruption(_))));
    let dump = env.salvage("wallet.dat", false).unwrap();
    let body: Vec<&str> = dump
        .lines()
        .skip_while(|l| *l != HEADER_END)
        .skip(1)
        .take_while(|l| !l.starts_with("DATA"))
        .collect();
    assert_eq!(body.len(), 18);
}

#[test]
fn test_remove_log_segments() {
    let fixture = EnvTestFixture::new();
    let env = fixture.open();
    let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
    file.put(b"k", b"v").unwrap();

    env.remove_log_segments().unwrap();
    assert_eq!(fixture.log_segments(), 1);
    assert_eq!(file.get(b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_cursor_sees_committed_data_only() {
    let fixture = EnvTestFixture::new();
    let env = fixture.open();
    let file = env.open_file("wallet.dat", OpenMode::CREATE).unwrap();
    file.put(b"a", b"1").unwrap();

    let mut txn = file.begin().unwrap();
    txn.put(b"b", b"2").unwrap();

    let mut cursor = file.cursor().unwrap();
    assert!(cursor.get(&CursorOp::Next).unwrap());
    assert!(!cursor.get(&CursorOp::Next).unwrap());

    txn.commit(&file).unwrap();
    assert!(cursor.get(&CursorOp::Next).unwrap());
    assert_eq!(cursor.key(), b"b");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_crash_recovery_matches_model(
        ops in prop::collection::vec(
            (0u8..16, prop::option::of(prop::collection::vec(any::<u8>(), 0..8)), any::<bool>()),
            1..60,
        )
    ) {
        let fixture = EnvTestFixture::new();
        let mut model = BTreeMap::new();
        {
            let env = fixture.open();
            let file = env.open_file("chain.dat", OpenMode::CREATE).unwrap();
            for (key, value, checkpoint) in &ops {
                let key = vec![*key];
                match value {
                    Some(value) => {
                        file.put(&key, value).unwrap();
                        model.insert(key, value.clone());
                    }
                    None => {
                        file.delete(&key).unwrap();
                        model.remove(&key);
                    }
                }
                if *checkpoint {
                    env.checkpoint(0, 0).unwrap();
                }
            }
            drop(file);
            fixture.crash(env);
        }

        let env = fixture.open();
        let file = env.open_file("chain.dat", OpenMode::READ).unwrap();
        let mut cursor = file.cursor().unwrap();
        let mut seen = BTreeMap::new();
        while cursor.get(&CursorOp::Next).unwrap() {
            seen.insert(cursor.key().to_vec(), cursor.value().to_vec());
        }
        prop_assert_eq!(seen, model);
    }
}
