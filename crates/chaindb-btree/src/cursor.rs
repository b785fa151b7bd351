//! Positioned cursors
//!
//! A cursor starts unpositioned. `Next` and `Prev` on an unpositioned
//! cursor behave like `First` and `Last`. A failed get leaves the position
//! where it was. The key and value of the last successful get are kept in
//! the cursor until the next get or [`Cursor::scrub`].

use crate::file::FileInner;
use chaindb_core::Result;
use std::ops::Bound;
use std::sync::Arc;
use zeroize::Zeroize;

/// Positioning flag for [`Cursor::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorOp {
    First,
    Last,
    Next,
    Prev,
    /// Re-read the record at the current position
    Current,
    /// Exact key
    Set(Vec<u8>),
    /// Smallest key at or after the given one
    SetRange(Vec<u8>),
    /// Exact key and value
    GetBoth(Vec<u8>, Vec<u8>),
    /// Exact key with a value at or after the given one
    GetBothRange(Vec<u8>, Vec<u8>),
}

/// Cursor over the committed records of one file
pub struct Cursor {
    file: Arc<FileInner>,
    position: Option<Vec<u8>>,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl Cursor {
    pub(crate) fn new(file: Arc<FileInner>) -> Self {
        Self {
            file,
            position: None,
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Move according to `op`; returns whether a record was found
    pub fn get(&mut self, op: &CursorOp) -> Result<bool> {
        let tree = self.file.read_tree()?;
        let entries = &tree.entries;
        let position = self.position.as_deref();

        let found = match op {
            CursorOp::First => entries.iter().next(),
            CursorOp::Last => entries.iter().next_back(),
            CursorOp::Next => match position {
                None => entries.iter().next(),
                Some(pos) => entries
                    .range::<[u8], _>((Bound::Excluded(pos), Bound::Unbounded))
                    .next(),
            },
            CursorOp::Prev => match position {
                None => entries.iter().next_back(),
                Some(pos) => entries
                    .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(pos)))
                    .next_back(),
            },
            CursorOp::Current => position.and_then(|pos| entries.get_key_value(pos)),
            CursorOp::Set(key) => entries.get_key_value(key.as_slice()),
            CursorOp::SetRange(key) => entries
                .range::<[u8], _>((Bound::Included(key.as_slice()), Bound::Unbounded))
                .next(),
            CursorOp::GetBoth(key, value) => entries
                .get_key_value(key.as_slice())
                .filter(|(_, v)| *v == value),
            CursorOp::GetBothRange(key, value) => entries
                .get_key_value(key.as_slice())
                .filter(|(_, v)| v.as_slice() >= value.as_slice()),
        };

        self.key.zeroize();
        self.value.zeroize();
        match found {
            Some((key, value)) => {
                self.position = Some(key.clone());
                self.key.extend_from_slice(key);
                self.value.extend_from_slice(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Key of the last successful get
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Value of the last successful get
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Zero the cursor's copies of the last record; the position is kept
    pub fn scrub(&mut self) {
        self.key.zeroize();
        self.value.zeroize();
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.scrub();
        if let Some(position) = &mut self.position {
            position.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BTreeEnv, BTreeFile, BTreeOptions};
    use chaindb_core::OpenMode;
    use tempfile::{tempdir, TempDir};

    fn sample() -> (TempDir, BTreeEnv, BTreeFile) {
        let dir = tempdir().unwrap();
        let env = BTreeEnv::open(dir.path(), BTreeOptions::default()).unwrap();
        let file = env.open_file("addr.dat", OpenMode::CREATE).unwrap();
        for (k, v) in [("b", "2"), ("d", "4"), ("f", "6")] {
            file.put(k.as_bytes(), v.as_bytes()).unwrap();
        }
        (dir, env, file)
    }

    fn walk(cursor: &mut Cursor, op: CursorOp) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        while cursor.get(&op).unwrap() {
            keys.push(cursor.key().to_vec());
        }
        keys
    }

    #[test]
    fn test_next_from_unpositioned() {
        let (_dir, _env, file) = sample();
        let mut cursor = file.cursor().unwrap();
        assert_eq!(
            walk(&mut cursor, CursorOp::Next),
            vec![b"b".to_vec(), b"d".to_vec(), b"f".to_vec()]
        );
        // Stays on the last record after running off the end
        assert!(cursor.get(&CursorOp::Current).unwrap());
        assert_eq!(cursor.key(), b"f");
    }

    #[test]
    fn test_prev_from_unpositioned() {
        let (_dir, _env, file) = sample();
        let mut cursor = file.cursor().unwrap();
        assert_eq!(
            walk(&mut cursor, CursorOp::Prev),
            vec![b"f".to_vec(), b"d".to_vec(), b"b".to_vec()]
        );
    }

    #[test]
    fn test_set_and_set_range() {
        let (_dir, _env, file) = sample();
        let mut cursor = file.cursor().unwrap();

        assert!(!cursor.get(&CursorOp::Set(b"c".to_vec())).unwrap());
        assert!(cursor.get(&CursorOp::SetRange(b"c".to_vec())).unwrap());
        assert_eq!(cursor.key(), b"d");
        assert_eq!(cursor.value(), b"4");

        assert!(cursor.get(&CursorOp::Next).unwrap());
        assert_eq!(cursor.key(), b"f");
        assert!(!cursor.get(&CursorOp::SetRange(b"g".to_vec())).unwrap());
    }

    #[test]
    fn test_prev_steps_back_from_set_range() {
        let (_dir, _env, file) = sample();
        let mut cursor = file.cursor().unwrap();

        assert!(cursor.get(&CursorOp::SetRange(b"e".to_vec())).unwrap());
        assert_eq!(cursor.key(), b"f");
        assert!(cursor.get(&CursorOp::Prev).unwrap());
        assert_eq!(cursor.key(), b"d");
        assert!(cursor.get(&CursorOp::Prev).unwrap());
        assert_eq!(cursor.key(), b"b");
        assert!(!cursor.get(&CursorOp::Prev).unwrap());

        assert!(cursor.get(&CursorOp::SetRange(b"a".to_vec())).unwrap());
        assert_eq!(cursor.key(), b"b");
    }

    #[test]
    fn test_get_both() {
        let (_dir, _env, file) = sample();
        let mut cursor = file.cursor().unwrap();

        assert!(cursor
            .get(&CursorOp::GetBoth(b"d".to_vec(), b"4".to_vec()))
            .unwrap());
        assert!(!cursor
            .get(&CursorOp::GetBoth(b"d".to_vec(), b"5".to_vec()))
            .unwrap());
        assert!(cursor
            .get(&CursorOp::GetBothRange(b"d".to_vec(), b"3".to_vec()))
            .unwrap());
        assert!(!cursor
            .get(&CursorOp::GetBothRange(b"d".to_vec(), b"5".to_vec()))
            .unwrap());
    }

    #[test]
    fn test_scrub_keeps_position() {
        let (_dir, _env, file) = sample();
        let mut cursor = file.cursor().unwrap();
        assert!(cursor.get(&CursorOp::First).unwrap());

        cursor.scrub();
        assert!(cursor.key().iter().all(|&b| b == 0));

        assert!(cursor.get(&CursorOp::Next).unwrap());
        assert_eq!(cursor.key(), b"d");
    }
}
