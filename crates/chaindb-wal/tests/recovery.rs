// Crash scenarios: torn tails, damaged frames, unfinished groups

mod common;

use chaindb_wal::segment::SEGMENT_HEADER_LEN;
use chaindb_wal::{replay, LogEntry, LogRecord};
use common::{put, LogDir};
use std::fs::{self, OpenOptions};

fn write_three(dir: &LogDir) {
    let mut wal = dir.open();
    for i in 0..3 {
        wal.append(put(0, i)).unwrap();
    }
    wal.close().unwrap();
}

fn chop_tail(dir: &LogDir, bytes: u64) {
    let segment = dir.segment_files().remove(0);
    let len = fs::metadata(&segment).unwrap().len();
    let file = OpenOptions::new().write(true).open(&segment).unwrap();
    file.set_len(len - bytes).unwrap();
}

fn keys(dir: &LogDir) -> Vec<Vec<u8>> {
    replay(&dir.path)
        .unwrap()
        .records
        .into_iter()
        .filter_map(|r| match r.entry {
            LogEntry::Put { key, .. } => Some(key),
            _ => None,
        })
        .collect()
}

#[test]
fn test_clean_shutdown() {
    let dir = LogDir::new();
    write_three(&dir);
    assert_eq!(keys(&dir).len(), 3);
}

#[test]
fn test_torn_tail_loses_only_last_record() {
    let dir = LogDir::new();
    write_three(&dir);
    chop_tail(&dir, 3);

    assert_eq!(keys(&dir), vec![b"key0".to_vec(), b"key1".to_vec()]);
}

#[test]
fn test_damaged_frame_ends_segment() {
    let dir = LogDir::new();
    write_three(&dir);

    let frame = put(0, 0).encode().unwrap().len();
    let segment = dir.segment_files().remove(0);
    let mut bytes = fs::read(&segment).unwrap();
    bytes[SEGMENT_HEADER_LEN + 2 * frame + 20] ^= 0xFF;
    fs::write(&segment, bytes).unwrap();

    assert_eq!(keys(&dir).len(), 2);
}

#[test]
fn test_append_after_torn_tail() {
    let dir = LogDir::new();
    write_three(&dir);
    chop_tail(&dir, 3);

    let mut wal = dir.open();
    assert_eq!(wal.last_lsn(), 2);
    assert_eq!(wal.append(put(0, 9)).unwrap(), 3);
    wal.close().unwrap();

    assert_eq!(
        keys(&dir),
        vec![b"key0".to_vec(), b"key1".to_vec(), b"key9".to_vec()]
    );
}

#[test]
fn test_unfinished_group_is_dropped() {
    let dir = LogDir::new();
    {
        let mut wal = dir.open();
        wal.append_all(vec![
            LogRecord::begin(1),
            LogRecord::put(0, b"tx_key1".to_vec(), b"tx_val1".to_vec()),
            LogRecord::commit(1),
        ])
        .unwrap();

        wal.append(LogRecord::begin(2)).unwrap();
        wal.append(LogRecord::put(0, b"tx_key2".to_vec(), b"tx_val2".to_vec()))
            .unwrap();
    }

    let replay = replay(&dir.path).unwrap();
    assert_eq!(replay.stats.groups_dropped, 1);
    assert_eq!(replay.records.len(), 1);
    assert_eq!(
        replay.records[0].entry,
        LogEntry::Put {
            file: 0,
            key: b"tx_key1".to_vec(),
            value: b"tx_val1".to_vec(),
        }
    );
}

#[test]
fn test_missing_directory_replays_nothing() {
    let dir = LogDir::new();
    assert!(replay(&dir.path).unwrap().records.is_empty());
}
