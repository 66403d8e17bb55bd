//! Minimal in-memory buffer manager.
//!
//! The core consumes the buffer manager as an opaque collaborator: an
//! addressable store for block column vectors. This implementation keeps
//! everything resident; eviction and block file I/O belong to the storage
//! layer outside the core.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tephra_types::{BlockId, ColumnId, SegmentId, Value};

/// Address of one block column within a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockColumnKey {
    pub db_name: String,
    pub table_name: String,
    pub segment_id: SegmentId,
    pub block_id: BlockId,
    pub column_id: ColumnId,
}

/// Shared store of block column vectors.
#[derive(Debug, Default)]
pub struct BufferManager {
    columns: RwLock<HashMap<BlockColumnKey, Arc<Vec<Value>>>>,
}

impl BufferManager {
    /// Create an empty buffer manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a block column vector.
    pub fn store_column(&self, key: BlockColumnKey, values: Arc<Vec<Value>>) {
        self.columns.write().insert(key, values);
    }

    /// Fetch a block column vector.
    #[must_use]
    pub fn get_column(&self, key: &BlockColumnKey) -> Option<Arc<Vec<Value>>> {
        self.columns.read().get(key).cloned()
    }

    /// Number of resident block columns (diagnostics).
    #[must_use]
    pub fn resident_columns(&self) -> usize {
        self.columns.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(block_id: BlockId) -> BlockColumnKey {
        BlockColumnKey {
            db_name: "db".to_owned(),
            table_name: "t".to_owned(),
            segment_id: 0,
            block_id,
            column_id: 1,
        }
    }

    #[test]
    fn store_and_fetch() {
        let buffer = BufferManager::new();
        buffer.store_column(key(0), Arc::new(vec![Value::Integer(7)]));
        let col = buffer.get_column(&key(0)).expect("present");
        assert_eq!(col[0], Value::Integer(7));
        assert!(buffer.get_column(&key(1)).is_none());
        assert_eq!(buffer.resident_columns(), 1);
    }
}
