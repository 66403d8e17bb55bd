//! Table entries: segments, blocks, indexes, and the fulltext ingest path.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tephra_error::{Result, TephraError};
use tephra_index::{FulltextIndexMeta, IndexReader, TableIndexReaderCache};
use tephra_types::{
    BlockId, ColumnDef, ColumnId, DataBlock, IndexDef, IndexType, RowId, SegmentId, SegmentInfo,
    SegmentStatus, TxnId, TxnTimestamp, DEFAULT_SEGMENT_CAPACITY, UNCOMMIT_TS,
};
use tephra_vfs::Vfs;
use tracing::{debug, trace};

use crate::buffer::{BlockColumnKey, BufferManager};
use crate::entry::EntryList;
use crate::index_entry::TableIndexEntry;

/// First row id of a segment. Segments own fixed-width runs of the row
/// space so a row id maps back to its segment by division.
#[must_use]
pub fn segment_base_row_id(segment_id: SegmentId) -> RowId {
    RowId::new(u64::from(segment_id) * DEFAULT_SEGMENT_CAPACITY)
}

/// Segment owning `row_id`.
#[must_use]
pub fn segment_of_row(row_id: RowId) -> SegmentId {
    (row_id.get() / DEFAULT_SEGMENT_CAPACITY) as SegmentId
}

// ---------------------------------------------------------------------------
// Block / segment entries
// ---------------------------------------------------------------------------

/// Fixed row group within a segment.
#[derive(Debug)]
pub struct BlockEntry {
    pub block_id: BlockId,
    /// Row offset of the block within its segment.
    pub start_offset: u64,
    pub row_capacity: u64,
    pub row_count: u64,
    /// Per-column `(next_idx, last_off)` out-of-line positions.
    pub outline_infos: Vec<(u32, u64)>,
}

/// A unit of row storage created by append, import, or compaction.
#[derive(Debug)]
pub struct SegmentEntry {
    segment_id: SegmentId,
    row_capacity: u64,
    column_count: u64,
    commit_ts: TxnTimestamp,
    status: Mutex<SegmentStatus>,
    deprecate_ts: Mutex<TxnTimestamp>,
    row_count: Mutex<u64>,
    actual_row_count: Mutex<u64>,
    blocks: RwLock<Vec<Arc<BlockEntry>>>,
}

impl SegmentEntry {
    /// Fresh unsealed segment accepting appends.
    #[must_use]
    pub fn new_unsealed(segment_id: SegmentId, column_count: u64, commit_ts: TxnTimestamp) -> Self {
        Self {
            segment_id,
            row_capacity: DEFAULT_SEGMENT_CAPACITY,
            column_count,
            commit_ts,
            status: Mutex::new(SegmentStatus::Unsealed),
            deprecate_ts: Mutex::new(UNCOMMIT_TS),
            row_count: Mutex::new(0),
            actual_row_count: Mutex::new(0),
            blocks: RwLock::new(Vec::new()),
        }
    }

    /// Segment rebuilt from a catalog snapshot.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn restore(
        segment_id: SegmentId,
        status: SegmentStatus,
        row_capacity: u64,
        column_count: u64,
        commit_ts: TxnTimestamp,
        deprecate_ts: TxnTimestamp,
        row_count: u64,
        actual_row_count: u64,
        blocks: Vec<Arc<BlockEntry>>,
    ) -> Self {
        Self {
            segment_id,
            row_capacity,
            column_count,
            commit_ts,
            status: Mutex::new(status),
            deprecate_ts: Mutex::new(deprecate_ts),
            row_count: Mutex::new(row_count),
            actual_row_count: Mutex::new(actual_row_count),
            blocks: RwLock::new(blocks),
        }
    }

    /// Sealed segment synthesized from an `Import`/`Compact` payload.
    /// Block and column layout derive entirely from the command.
    #[must_use]
    pub fn new_replay(info: &SegmentInfo, commit_ts: TxnTimestamp) -> Self {
        let mut blocks = Vec::with_capacity(info.block_infos.len());
        let mut start_offset = 0u64;
        for (block_id, block_info) in info.block_infos.iter().enumerate() {
            blocks.push(Arc::new(BlockEntry {
                block_id: block_id as BlockId,
                start_offset,
                row_capacity: block_info.row_capacity,
                row_count: block_info.row_count,
                outline_infos: block_info.outline_infos.clone(),
            }));
            start_offset += block_info.row_count;
        }
        Self {
            segment_id: info.segment_id,
            row_capacity: info.row_capacity,
            column_count: info.column_count,
            commit_ts,
            status: Mutex::new(SegmentStatus::Sealed),
            deprecate_ts: Mutex::new(UNCOMMIT_TS),
            row_count: Mutex::new(info.row_count),
            actual_row_count: Mutex::new(info.actual_row_count),
            blocks: RwLock::new(blocks),
        }
    }

    #[must_use]
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    #[must_use]
    pub fn commit_ts(&self) -> TxnTimestamp {
        self.commit_ts
    }

    #[must_use]
    pub fn status(&self) -> SegmentStatus {
        *self.status.lock()
    }

    #[must_use]
    pub fn row_count(&self) -> u64 {
        *self.row_count.lock()
    }

    #[must_use]
    pub fn actual_row_count(&self) -> u64 {
        *self.actual_row_count.lock()
    }

    #[must_use]
    pub fn row_capacity(&self) -> u64 {
        self.row_capacity
    }

    #[must_use]
    pub fn column_count(&self) -> u64 {
        self.column_count
    }

    #[must_use]
    pub fn deprecate_ts(&self) -> TxnTimestamp {
        *self.deprecate_ts.lock()
    }

    #[must_use]
    pub fn blocks(&self) -> Vec<Arc<BlockEntry>> {
        self.blocks.read().clone()
    }

    /// Visible to a snapshot if committed at or before it and not yet
    /// deprecated at it.
    #[must_use]
    pub fn is_visible(&self, begin_ts: TxnTimestamp) -> bool {
        self.commit_ts <= begin_ts && self.deprecate_ts() > begin_ts
    }

    /// Transition into `Compacting`. Only sealed segments compact.
    pub fn try_set_compacting(&self) -> bool {
        let mut status = self.status.lock();
        if *status == SegmentStatus::Sealed {
            *status = SegmentStatus::Compacting;
            true
        } else {
            false
        }
    }

    /// Forbid deletes while the compaction output commits.
    pub fn set_no_delete(&self) {
        *self.status.lock() = SegmentStatus::NoDelete;
    }

    /// Retire the segment at `commit_ts`.
    pub fn set_deprecated(&self, commit_ts: TxnTimestamp) {
        *self.status.lock() = SegmentStatus::Deprecated;
        *self.deprecate_ts.lock() = commit_ts;
    }
}

// ---------------------------------------------------------------------------
// Table entry
// ---------------------------------------------------------------------------

/// One version of a table: schema, segments, and indexes.
pub struct TableEntry {
    db_name: String,
    table_name: String,
    table_dir: PathBuf,
    columns: Vec<ColumnDef>,
    row_count: Mutex<u64>,
    next_segment_id: Mutex<SegmentId>,
    unsealed_segment_id: Mutex<Option<SegmentId>>,
    segments: RwLock<BTreeMap<SegmentId, Arc<SegmentEntry>>>,
    indexes: RwLock<BTreeMap<String, EntryList<TableIndexEntry>>>,
    index_reader_cache: TableIndexReaderCache,
    /// Commit ts of the newest mutation anywhere in the table subtree;
    /// delta snapshots use it to decide inclusion.
    last_change_ts: std::sync::atomic::AtomicU64,
}

impl std::fmt::Debug for TableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableEntry")
            .field("db_name", &self.db_name)
            .field("table_name", &self.table_name)
            .field("table_dir", &self.table_dir)
            .finish_non_exhaustive()
    }
}

impl TableEntry {
    /// New empty table.
    #[must_use]
    pub fn new(
        db_name: String,
        table_name: String,
        table_dir: PathBuf,
        columns: Vec<ColumnDef>,
    ) -> Self {
        Self {
            db_name,
            table_name,
            table_dir,
            columns,
            row_count: Mutex::new(0),
            next_segment_id: Mutex::new(0),
            unsealed_segment_id: Mutex::new(None),
            segments: RwLock::new(BTreeMap::new()),
            indexes: RwLock::new(BTreeMap::new()),
            index_reader_cache: TableIndexReaderCache::new(),
            last_change_ts: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Record a mutation committed at `commit_ts` anywhere in the table.
    pub fn touch(&self, commit_ts: TxnTimestamp) {
        self.last_change_ts
            .fetch_max(commit_ts, std::sync::atomic::Ordering::SeqCst);
    }

    /// Commit ts of the newest mutation in the table subtree.
    #[must_use]
    pub fn last_change_ts(&self) -> TxnTimestamp {
        self.last_change_ts
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[must_use]
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    #[must_use]
    pub fn table_dir(&self) -> &PathBuf {
        &self.table_dir
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    #[must_use]
    pub fn row_count(&self) -> u64 {
        *self.row_count.lock()
    }

    #[must_use]
    pub fn next_segment_id(&self) -> SegmentId {
        *self.next_segment_id.lock()
    }

    #[must_use]
    pub fn unsealed_segment_id(&self) -> Option<SegmentId> {
        *self.unsealed_segment_id.lock()
    }

    /// Column id for `name`.
    pub fn column_id_by_name(&self, name: &str) -> Result<ColumnId> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id)
            .ok_or_else(|| TephraError::NoSuchColumn {
                name: name.to_owned(),
            })
    }

    /// Per-table reader cache.
    #[must_use]
    pub fn index_reader_cache(&self) -> &TableIndexReaderCache {
        &self.index_reader_cache
    }

    /// Segment by id.
    pub fn get_segment(&self, segment_id: SegmentId) -> Result<Arc<SegmentEntry>> {
        self.segments
            .read()
            .get(&segment_id)
            .cloned()
            .ok_or(TephraError::NoSuchSegment { segment_id })
    }

    /// All segments, in id order.
    #[must_use]
    pub fn segments(&self) -> Vec<Arc<SegmentEntry>> {
        self.segments.read().values().cloned().collect()
    }

    /// Restore a segment from a catalog snapshot.
    pub fn restore_segment(&self, segment: Arc<SegmentEntry>) {
        let id = segment.segment_id();
        let mut next = self.next_segment_id.lock();
        *next = (*next).max(id + 1);
        if segment.status() == SegmentStatus::Unsealed {
            *self.unsealed_segment_id.lock() = Some(id);
        }
        self.segments.write().insert(id, segment);
    }

    /// Restore the table's row count from a catalog snapshot.
    pub fn restore_row_count(&self, row_count: u64) {
        *self.row_count.lock() = row_count;
    }

    // -- Append / delete ----------------------------------------------------

    /// Append a row batch into the unsealed segment, creating one if
    /// needed. Column vectors land in the buffer manager; returns the
    /// segment and the first row id of the batch.
    pub fn append(
        &self,
        buffer: &BufferManager,
        block: &DataBlock,
        commit_ts: TxnTimestamp,
    ) -> Result<(SegmentId, RowId, u64)> {
        if block.column_count() != self.columns.len() {
            return Err(TephraError::internal(format!(
                "append block has {} columns, table {} has {}",
                block.column_count(),
                self.table_name,
                self.columns.len()
            )));
        }
        let rows = block.row_count();
        let segment = self.unsealed_segment(commit_ts);
        let start_offset;
        let block_id;
        {
            let mut row_count = segment.row_count.lock();
            start_offset = *row_count;
            *row_count += rows;
            *segment.actual_row_count.lock() += rows;
            let mut blocks = segment.blocks.write();
            block_id = blocks.len() as BlockId;
            blocks.push(Arc::new(BlockEntry {
                block_id,
                start_offset,
                row_capacity: rows,
                row_count: rows,
                outline_infos: vec![(0, 0); self.columns.len()],
            }));
        }
        for (pos, column) in self.columns.iter().enumerate() {
            let values = block
                .column(pos)
                .ok_or_else(|| TephraError::internal("append block missing column"))?;
            buffer.store_column(
                BlockColumnKey {
                    db_name: self.db_name.clone(),
                    table_name: self.table_name.clone(),
                    segment_id: segment.segment_id(),
                    block_id,
                    column_id: column.id,
                },
                Arc::new(values.to_vec()),
            );
        }
        *self.row_count.lock() += rows;
        let start_row = segment_base_row_id(segment.segment_id()).offset(start_offset);
        trace!(
            table = %self.table_name,
            segment_id = segment.segment_id(),
            start_row = %start_row,
            rows,
            "appended row batch"
        );
        Ok((segment.segment_id(), start_row, rows))
    }

    fn unsealed_segment(&self, commit_ts: TxnTimestamp) -> Arc<SegmentEntry> {
        let mut unsealed = self.unsealed_segment_id.lock();
        if let Some(id) = *unsealed {
            if let Some(segment) = self.segments.read().get(&id) {
                if segment.status() == SegmentStatus::Unsealed {
                    return Arc::clone(segment);
                }
            }
        }
        let mut next = self.next_segment_id.lock();
        let id = *next;
        *next += 1;
        let segment = Arc::new(SegmentEntry::new_unsealed(
            id,
            self.columns.len() as u64,
            commit_ts,
        ));
        self.segments.write().insert(id, Arc::clone(&segment));
        *unsealed = Some(id);
        debug!(table = %self.table_name, segment_id = id, "opened unsealed segment");
        segment
    }

    /// Mark rows deleted. Deletes against a `NoDelete` segment are an
    /// invariant violation.
    pub fn delete_rows(&self, row_ids: &[RowId]) -> Result<()> {
        for row_id in row_ids {
            let segment_id = segment_of_row(*row_id);
            let segment = self.get_segment(segment_id)?;
            if segment.status() == SegmentStatus::NoDelete {
                return Err(TephraError::internal(format!(
                    "delete into no-delete segment {segment_id}"
                )));
            }
            let mut actual = segment.actual_row_count.lock();
            *actual = actual.saturating_sub(1);
        }
        let mut row_count = self.row_count.lock();
        *row_count = row_count.saturating_sub(row_ids.len() as u64);
        Ok(())
    }

    // -- Import / compact ---------------------------------------------------

    /// Add a sealed segment synthesized from an `Import`/`Compact`
    /// payload.
    pub fn add_segment_replay(
        &self,
        info: &SegmentInfo,
        commit_ts: TxnTimestamp,
    ) -> Result<Arc<SegmentEntry>> {
        let segment = Arc::new(SegmentEntry::new_replay(info, commit_ts));
        let mut segments = self.segments.write();
        if segments.contains_key(&info.segment_id) {
            return Err(TephraError::internal(format!(
                "segment {} already exists in table {}",
                info.segment_id, self.table_name
            )));
        }
        segments.insert(info.segment_id, Arc::clone(&segment));
        drop(segments);
        let mut next = self.next_segment_id.lock();
        *next = (*next).max(info.segment_id + 1);
        drop(next);
        *self.row_count.lock() += info.actual_row_count;
        Ok(segment)
    }

    /// Retire compacted source segments. Each must be compactable.
    pub fn deprecate_segments(
        &self,
        segment_ids: &[SegmentId],
        commit_ts: TxnTimestamp,
    ) -> Result<()> {
        for segment_id in segment_ids {
            let segment = self.get_segment(*segment_id)?;
            if !segment.try_set_compacting() {
                return Err(TephraError::internal(format!(
                    "segment {segment_id} is not compactable"
                )));
            }
            segment.set_no_delete();
            segment.set_deprecated(commit_ts);
            let mut row_count = self.row_count.lock();
            *row_count = row_count.saturating_sub(segment.actual_row_count());
        }
        Ok(())
    }

    // -- Indexes ------------------------------------------------------------

    /// Create an index version at `commit_ts`.
    pub fn create_index_replay(
        &self,
        def: IndexDef,
        dir_tail: &str,
        txn_id: TxnId,
        commit_ts: TxnTimestamp,
    ) -> Result<Arc<TableIndexEntry>> {
        let mut indexes = self.indexes.write();
        let list = indexes.entry(def.index_name.clone()).or_default();
        if list.latest_live().is_some() {
            return Err(TephraError::IndexExists {
                name: def.index_name,
            });
        }
        let index_dir = self.table_dir.join(dir_tail);
        let entry = Arc::new(TableIndexEntry::new(def, index_dir));
        list.push_live(Arc::clone(&entry), txn_id, commit_ts);
        Ok(entry)
    }

    /// Drop an index version at `commit_ts`.
    pub fn drop_index_replay(
        &self,
        index_name: &str,
        txn_id: TxnId,
        commit_ts: TxnTimestamp,
    ) -> Result<()> {
        let mut indexes = self.indexes.write();
        let list = indexes
            .get_mut(index_name)
            .filter(|list| list.latest_live().is_some())
            .ok_or_else(|| TephraError::NoSuchIndex {
                name: index_name.to_owned(),
            })?;
        list.push_dropped(txn_id, commit_ts);
        Ok(())
    }

    /// Newest live index entry (replay path).
    pub fn get_index_replay(&self, index_name: &str) -> Result<Arc<TableIndexEntry>> {
        self.indexes
            .read()
            .get(index_name)
            .and_then(EntryList::latest_live)
            .cloned()
            .ok_or_else(|| TephraError::NoSuchIndex {
                name: index_name.to_owned(),
            })
    }

    /// Index entries visible to a snapshot, with their names.
    #[must_use]
    pub fn visible_indexes(&self, begin_ts: TxnTimestamp) -> Vec<Arc<TableIndexEntry>> {
        self.indexes
            .read()
            .values()
            .filter_map(|list| list.visible(begin_ts).cloned())
            .collect()
    }

    /// Index chains for snapshot persistence: newest record per name
    /// committed at or before `ts`.
    #[must_use]
    pub fn index_records_visible(
        &self,
        ts: TxnTimestamp,
    ) -> Vec<(String, crate::entry::EntryRecord<TableIndexEntry>)> {
        self.indexes
            .read()
            .iter()
            .filter_map(|(name, list)| list.record_visible(ts).map(|r| (name.clone(), r.clone())))
            .collect()
    }

    /// Restore an index chain record from a catalog snapshot.
    pub fn restore_index(
        &self,
        name: String,
        entry: Option<Arc<TableIndexEntry>>,
        txn_id: TxnId,
        commit_ts: TxnTimestamp,
    ) {
        let mut indexes = self.indexes.write();
        let list = indexes.entry(name).or_default();
        match entry {
            Some(entry) => list.push_live(entry, txn_id, commit_ts),
            None => list.push_dropped(txn_id, commit_ts),
        }
    }

    /// Fulltext index descriptors visible to a snapshot, as consumed by
    /// the reader cache. Non-fulltext indexes are filtered out here.
    pub fn fulltext_metas(&self, begin_ts: TxnTimestamp) -> Result<Vec<FulltextIndexMeta>> {
        let mut metas = Vec::new();
        for (name, list) in self.indexes.read().iter() {
            let Some(entry) = list.visible(begin_ts) else {
                continue;
            };
            let def = entry.def();
            if def.index_type != IndexType::FullText {
                continue;
            }
            let column_id = self.column_id_by_name(&def.column_name)?;
            metas.push(FulltextIndexMeta {
                index_name: name.clone(),
                column_id,
                column_name: def.column_name.clone(),
                analyzer: def.analyzer.clone(),
                flags: def.flags,
                index_dir: entry.index_dir().clone(),
                segment_update_ts: *entry.segment_update_ts.lock(),
                segments: entry.segment_snapshots(),
            });
        }
        Ok(metas)
    }

    /// Readers for every fulltext index visible at `begin_ts`, served
    /// through the table's MVCC cache.
    pub fn get_index_reader(
        &self,
        vfs: &dyn Vfs,
        begin_ts: TxnTimestamp,
    ) -> Result<IndexReader> {
        let metas = self.fulltext_metas(begin_ts)?;
        self.index_reader_cache
            .get_index_reader(vfs, begin_ts, &metas)
    }

    /// Feed an appended row batch into every live fulltext index.
    pub fn fulltext_ingest(
        &self,
        block: &DataBlock,
        segment_id: SegmentId,
        start_row: RowId,
        commit_ts: TxnTimestamp,
    ) -> Result<()> {
        let indexes: Vec<Arc<TableIndexEntry>> = self
            .indexes
            .read()
            .values()
            .filter_map(EntryList::latest_live)
            .cloned()
            .collect();
        for index in indexes {
            let def = index.def();
            if def.index_type != IndexType::FullText {
                continue;
            }
            let column_id = self.column_id_by_name(&def.column_name)?;
            let pos = self
                .columns
                .iter()
                .position(|c| c.id == column_id)
                .ok_or_else(|| TephraError::internal("column id out of range"))?;
            let values = block
                .column(pos)
                .ok_or_else(|| TephraError::internal("ingest block missing column"))?;
            let segment_index = index.get_or_create_segment_index(segment_id);
            let indexer = segment_index.ensure_memory(def, start_row);
            for (i, value) in values.iter().enumerate() {
                if let Some(text) = value.as_str() {
                    indexer.insert(start_row.offset(i as u64), text);
                }
            }
            self.index_reader_cache
                .update_known_update_ts(commit_ts, &index.segment_update_ts)?;
        }
        Ok(())
    }

    /// Build a fulltext index over already-resident rows (create-index
    /// path, also re-executed by replay).
    pub fn build_fulltext_index(
        &self,
        buffer: &BufferManager,
        index: &Arc<TableIndexEntry>,
        commit_ts: TxnTimestamp,
    ) -> Result<()> {
        let def = index.def();
        if def.index_type != IndexType::FullText {
            return Ok(());
        }
        let column_id = self.column_id_by_name(&def.column_name)?;
        for segment in self.segments() {
            if segment.status() == SegmentStatus::Deprecated {
                continue;
            }
            let base = segment_base_row_id(segment.segment_id());
            let mut indexer = None;
            for block in segment.blocks() {
                let key = BlockColumnKey {
                    db_name: self.db_name.clone(),
                    table_name: self.table_name.clone(),
                    segment_id: segment.segment_id(),
                    block_id: block.block_id,
                    column_id,
                };
                let Some(values) = buffer.get_column(&key) else {
                    // Rows whose data never reached this process (e.g.
                    // imported segments) contribute nothing to the build.
                    continue;
                };
                let indexer = indexer.get_or_insert_with(|| {
                    index
                        .get_or_create_segment_index(segment.segment_id())
                        .ensure_memory(def, base)
                });
                for (i, value) in values.iter().enumerate() {
                    if let Some(text) = value.as_str() {
                        indexer.insert(base.offset(block.start_offset + i as u64), text);
                    }
                }
            }
        }
        self.index_reader_cache
            .update_known_update_ts(commit_ts, &index.segment_update_ts)
    }
}
