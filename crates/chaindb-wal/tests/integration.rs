// Appending, reopening and rotation through the public log API

mod common;

use chaindb_wal::{LogEntry, SyncMode, Wal};
use common::{put, LogDir};

#[test]
fn test_first_append_creates_one_segment() {
    let dir = LogDir::new();

    let mut wal = dir.open();
    assert_eq!(wal.append(put(1, 0)).unwrap(), 1);
    wal.close().unwrap();

    assert_eq!(dir.segment_files().len(), 1);
}

#[test]
fn test_every_sync_mode_survives_close() {
    for sync_mode in [SyncMode::Sync, SyncMode::Async, SyncMode::None] {
        let dir = LogDir::new();
        let options = dir.options().with_sync_mode(sync_mode);

        {
            let mut wal = Wal::open(options.clone()).unwrap();
            for i in 0..10 {
                wal.append(put(0, i)).unwrap();
            }
            wal.close().unwrap();
        }

        let wal = Wal::open(options).unwrap();
        assert_eq!(wal.replay().unwrap().records.len(), 10, "mode {:?}", sync_mode);
    }
}

#[test]
fn test_numbering_continues_after_reopen() {
    let dir = LogDir::new();
    {
        let mut wal = dir.open();
        for i in 0..3 {
            wal.append(put(0, i)).unwrap();
        }
    }

    let mut wal = dir.open();
    assert_eq!(wal.last_lsn(), 3);
    assert_eq!(wal.append(put(0, 3)).unwrap(), 4);

    let lsns: Vec<u64> = wal
        .reader()
        .unwrap()
        .read_all()
        .unwrap()
        .iter()
        .map(|r| r.lsn)
        .collect();
    assert_eq!(lsns, vec![1, 2, 3, 4]);
}

#[test]
fn test_records_keep_their_file() {
    let dir = LogDir::new();
    let mut wal = dir.open();
    wal.append(put(11, 0)).unwrap();
    wal.append(put(22, 1)).unwrap();

    let files: Vec<Option<u64>> = wal
        .replay()
        .unwrap()
        .records
        .iter()
        .map(|r| r.entry.file())
        .collect();
    assert_eq!(files, vec![Some(11), Some(22)]);
}

#[test]
fn test_small_segments_rotate() {
    let dir = LogDir::new();
    let mut wal = Wal::open(dir.options().with_segment_bytes(128)).unwrap();
    for i in 0..25 {
        wal.append(put(0, i)).unwrap();
    }
    wal.close().unwrap();

    assert!(dir.segment_files().len() > 1);
    let records = wal.replay().unwrap().records;
    assert_eq!(records.len(), 25);
    match &records[24].entry {
        LogEntry::Put { key, .. } => assert_eq!(key, b"key24"),
        other => panic!("unexpected entry {:?}", other),
    }
}

#[test]
fn test_remove_before_rotation_boundary() {
    let dir = LogDir::new();
    let mut wal = dir.open();
    wal.append(put(0, 0)).unwrap();
    let boundary = wal.rotate().unwrap();
    wal.append(put(0, 1)).unwrap();

    assert_eq!(wal.remove_before(boundary).unwrap(), 1);
    let records = wal.replay().unwrap().records;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].lsn, boundary);
}
