//! Table index entries and their per-segment fulltext state.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tephra_index::{MemoryIndexer, SegmentIndexSnapshot};
use tephra_types::{IndexDef, RowId, SegmentId, TxnTimestamp};

/// Fulltext index state for one segment: sealed sub-segments plus the
/// optional in-memory tail still receiving documents.
pub struct SegmentIndexEntry {
    segment_id: SegmentId,
    sealed: Mutex<Vec<(String, RowId)>>,
    memory: Mutex<Option<Arc<MemoryIndexer>>>,
    sealed_column_length_sum: Mutex<u64>,
    sealed_document_count: Mutex<u32>,
}

impl SegmentIndexEntry {
    /// Empty entry for `segment_id`.
    #[must_use]
    pub fn new(segment_id: SegmentId) -> Self {
        Self {
            segment_id,
            sealed: Mutex::new(Vec::new()),
            memory: Mutex::new(None),
            sealed_column_length_sum: Mutex::new(0),
            sealed_document_count: Mutex::new(0),
        }
    }

    /// Segment this entry indexes.
    #[must_use]
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Register a sealed sub-segment restored from a snapshot.
    pub fn add_sealed(&self, base_name: String, base_row_id: RowId, length_sum: u64, docs: u32) {
        self.sealed.lock().push((base_name, base_row_id));
        *self.sealed_column_length_sum.lock() += length_sum;
        *self.sealed_document_count.lock() += docs;
    }

    /// The in-memory tail, creating it at `base_row_id` on first use.
    pub fn ensure_memory(
        &self,
        def: &IndexDef,
        base_row_id: RowId,
    ) -> Arc<MemoryIndexer> {
        let mut memory = self.memory.lock();
        if let Some(indexer) = memory.as_ref() {
            return Arc::clone(indexer);
        }
        let base_name = format!(
            "seg{}_ft{}",
            self.segment_id,
            self.sealed.lock().len()
        );
        let indexer = Arc::new(MemoryIndexer::new(base_name, base_row_id, def.flags));
        *memory = Some(Arc::clone(&indexer));
        indexer
    }

    /// Point-in-time view consumed by [`tephra_index::ColumnIndexReader`].
    #[must_use]
    pub fn snapshot(&self) -> SegmentIndexSnapshot {
        SegmentIndexSnapshot {
            sealed: self.sealed.lock().clone(),
            memory: self.memory.lock().clone(),
            column_length_sum: *self.sealed_column_length_sum.lock(),
            document_count: *self.sealed_document_count.lock(),
        }
    }

    /// Overwrite the sealed length accounting (snapshot restore, where
    /// totals are persisted segment-wide rather than per sub-segment).
    pub fn set_sealed_totals(&self, length_sum: u64, docs: u32) {
        *self.sealed_column_length_sum.lock() = length_sum;
        *self.sealed_document_count.lock() = docs;
    }

    /// Sealed sub-segments and length accounting, for snapshot persistence.
    #[must_use]
    pub fn sealed_state(&self) -> (Vec<(String, RowId)>, u64, u32) {
        (
            self.sealed.lock().clone(),
            *self.sealed_column_length_sum.lock(),
            *self.sealed_document_count.lock(),
        )
    }
}

/// A table index: definition plus per-segment state.
pub struct TableIndexEntry {
    def: IndexDef,
    index_dir: PathBuf,
    /// Commit ts of the newest segment mutation applied to this index.
    /// Paired with the table cache's update interval by
    /// `TableIndexReaderCache::update_known_update_ts`.
    pub segment_update_ts: Mutex<TxnTimestamp>,
    segment_indexes: RwLock<BTreeMap<SegmentId, Arc<SegmentIndexEntry>>>,
}

impl TableIndexEntry {
    /// New index entry rooted at `index_dir`.
    #[must_use]
    pub fn new(def: IndexDef, index_dir: PathBuf) -> Self {
        Self {
            def,
            index_dir,
            segment_update_ts: Mutex::new(0),
            segment_indexes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Index definition.
    #[must_use]
    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    /// Directory holding this index's sub-segment files.
    #[must_use]
    pub fn index_dir(&self) -> &PathBuf {
        &self.index_dir
    }

    /// Per-segment entry, created on demand.
    pub fn get_or_create_segment_index(&self, segment_id: SegmentId) -> Arc<SegmentIndexEntry> {
        if let Some(entry) = self.segment_indexes.read().get(&segment_id) {
            return Arc::clone(entry);
        }
        let mut map = self.segment_indexes.write();
        Arc::clone(
            map.entry(segment_id)
                .or_insert_with(|| Arc::new(SegmentIndexEntry::new(segment_id))),
        )
    }

    /// Snapshot of every segment's index state, keyed by ascending
    /// segment id.
    #[must_use]
    pub fn segment_snapshots(&self) -> BTreeMap<SegmentId, SegmentIndexSnapshot> {
        self.segment_indexes
            .read()
            .iter()
            .map(|(id, entry)| (*id, entry.snapshot()))
            .collect()
    }

    /// Per-segment entries, for snapshot persistence.
    #[must_use]
    pub fn segment_entries(&self) -> Vec<Arc<SegmentIndexEntry>> {
        self.segment_indexes.read().values().cloned().collect()
    }

    /// Restore a per-segment entry from a catalog snapshot.
    pub fn restore_segment_index(&self, entry: Arc<SegmentIndexEntry>) {
        self.segment_indexes
            .write()
            .insert(entry.segment_id(), entry);
    }
}

#[cfg(test)]
mod tests {
    use tephra_types::{IndexType, OptionFlags};

    use super::*;

    fn def() -> IndexDef {
        IndexDef {
            index_name: "idx_body".to_owned(),
            index_type: IndexType::FullText,
            column_name: "body".to_owned(),
            analyzer: "standard".to_owned(),
            flags: OptionFlags::default(),
        }
    }

    #[test]
    fn memory_indexer_is_created_once() {
        let entry = SegmentIndexEntry::new(3);
        let d = def();
        let a = entry.ensure_memory(&d, RowId::new(100));
        let b = entry.ensure_memory(&d, RowId::new(999));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.base_row_id(), RowId::new(100));
        assert_eq!(a.base_name(), "seg3_ft0");
    }

    #[test]
    fn snapshot_excludes_nothing_and_counts_sealed() {
        let entry = SegmentIndexEntry::new(0);
        entry.add_sealed("seg0_ft0".to_owned(), RowId::new(0), 42, 7);
        let snap = entry.snapshot();
        assert_eq!(snap.sealed.len(), 1);
        assert_eq!(snap.column_length_sum, 42);
        assert_eq!(snap.document_count, 7);
        assert!(snap.memory.is_none());
    }

    #[test]
    fn segment_entries_are_shared() {
        let index = TableIndexEntry::new(def(), PathBuf::from("tbl/idx_body"));
        let a = index.get_or_create_segment_index(1);
        let b = index.get_or_create_segment_index(1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(index.segment_snapshots().len(), 1);
    }
}
