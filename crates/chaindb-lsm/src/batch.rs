//! Write batch for atomic operations.

/// Kind of batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// Put a key-value pair.
    Put { value: Vec<u8> },
    /// Delete a key.
    Delete,
}

/// A single batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOperation {
    /// Key to operate on.
    pub key: Vec<u8>,
    /// Kind of operation.
    pub kind: OperationKind,
}

/// What a batch says about one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchLookup {
    /// The last operation on the key is a put of this value.
    Found(Vec<u8>),
    /// The last operation on the key is a delete.
    Deleted,
    /// The batch does not touch the key.
    Absent,
}

/// A batch of write operations applied atomically by [`crate::LsmStore::write`].
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    pub(crate) operations: Vec<BatchOperation>,
}

impl WriteBatch {
    /// Create a new empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a put operation to the batch.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.operations.push(BatchOperation {
            key: key.into(),
            kind: OperationKind::Put {
                value: value.into(),
            },
        });
    }

    /// Add a delete operation to the batch.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.operations.push(BatchOperation {
            key: key.into(),
            kind: OperationKind::Delete,
        });
    }

    /// Replay the operations in program order and report the final state of `key`.
    pub fn scan(&self, key: &[u8]) -> BatchLookup {
        let mut outcome = BatchLookup::Absent;
        for op in self.operations.iter().filter(|op| op.key == key) {
            outcome = match &op.kind {
                OperationKind::Put { value } => BatchLookup::Found(value.clone()),
                OperationKind::Delete => BatchLookup::Deleted,
            };
        }
        outcome
    }

    /// Operations in the order they were added.
    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }

    /// Get the number of operations in the batch.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Clear all operations from the batch.
    pub fn clear(&mut self) {
        self.operations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_batch() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());

        batch.put(b"key1".to_vec(), b"value1".to_vec());
        batch.put(b"key2".to_vec(), b"value2".to_vec());
        batch.delete(b"key3".to_vec());

        assert_eq!(batch.len(), 3);
        assert!(!batch.is_empty());

        batch.clear();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_scan_last_operation_wins() {
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"v1".to_vec());
        batch.put(b"other".to_vec(), b"x".to_vec());
        batch.put(b"k".to_vec(), b"v2".to_vec());

        assert_eq!(batch.scan(b"k"), BatchLookup::Found(b"v2".to_vec()));
        assert_eq!(batch.scan(b"missing"), BatchLookup::Absent);

        batch.delete(b"k".to_vec());
        assert_eq!(batch.scan(b"k"), BatchLookup::Deleted);

        batch.put(b"k".to_vec(), b"v3".to_vec());
        assert_eq!(batch.scan(b"k"), BatchLookup::Found(b"v3".to_vec()));
    }
}
