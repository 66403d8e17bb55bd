//! Per-table MVCC cache of column index readers.
//!
//! Many concurrent queries at nearby snapshots share one set of heavy
//! reader structures. The cache tracks the snapshot it was materialized at
//! (`cache_ts`) and the interval of commit timestamps of mutations it has
//! observed but not folded in (`[first_known_update_ts,
//! last_known_update_ts]`). A read whose `begin_ts` falls before the first
//! known update can use the cache as-is; a later read rebuilds only the
//! columns whose indexes actually changed and, once it has caught up past
//! all known updates, promotes its result to be the new cache.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tephra_error::{Result, TephraError};
use tephra_types::{ColumnId, OptionFlags, SegmentId, TxnTimestamp, UNCOMMIT_TS};
use tephra_vfs::Vfs;
use tracing::{debug, trace};

use crate::column_reader::{ColumnIndexReader, SegmentIndexSnapshot};

/// Everything the cache needs to know about one fulltext index visible to
/// a snapshot. Produced by the catalog from the index entries resolved at
/// `(txn_id, begin_ts)`; non-fulltext indexes are filtered out before this
/// point.
#[derive(Clone)]
pub struct FulltextIndexMeta {
    /// Index name (diagnostics only).
    pub index_name: String,
    /// Target column id.
    pub column_id: ColumnId,
    /// Target column name.
    pub column_name: String,
    /// Analyzer id recorded at index creation.
    pub analyzer: String,
    /// Option flag set of the index.
    pub flags: OptionFlags,
    /// Directory holding the index's sub-segment files.
    pub index_dir: PathBuf,
    /// Commit ts of the newest segment mutation applied to this index.
    pub segment_update_ts: TxnTimestamp,
    /// Per-segment snapshots, keyed by ascending segment id.
    pub segments: BTreeMap<SegmentId, SegmentIndexSnapshot>,
}

/// Shared result of a cache lookup.
#[derive(Clone, Default)]
pub struct IndexReader {
    /// Column id → column reader.
    pub column_index_readers: Arc<HashMap<ColumnId, Arc<ColumnIndexReader>>>,
    /// Column name → analyzer id.
    pub column_analyzers: Arc<HashMap<String, String>>,
}

impl IndexReader {
    /// Reader for `column_id`, if the snapshot has a fulltext index on it.
    #[must_use]
    pub fn column_reader(&self, column_id: ColumnId) -> Option<&Arc<ColumnIndexReader>> {
        self.column_index_readers.get(&column_id)
    }

    /// Analyzer id for `column_name`.
    #[must_use]
    pub fn analyzer(&self, column_name: &str) -> Option<&str> {
        self.column_analyzers.get(column_name).map(String::as_str)
    }
}

struct CacheState {
    /// Snapshot at which the cached readers were materialized.
    cache_ts: TxnTimestamp,
    /// Min commit ts of any mutation observed since `cache_ts`.
    first_known_update_ts: TxnTimestamp,
    /// Max commit ts of any mutation observed since `cache_ts`.
    last_known_update_ts: TxnTimestamp,
    /// When each cached per-column reader was built.
    cache_column_ts: HashMap<ColumnId, TxnTimestamp>,
    cache_column_readers: Arc<HashMap<ColumnId, Arc<ColumnIndexReader>>>,
    column_analyzers: Arc<HashMap<String, String>>,
}

/// MVCC-indexed cache of per-column index readers for one table.
///
/// Invariant: `cache_ts <= first_known_update_ts <=
/// last_known_update_ts` whenever the update interval is non-degenerate;
/// promotion only ever moves `cache_ts` forward.
pub struct TableIndexReaderCache {
    inner: Mutex<CacheState>,
}

impl Default for TableIndexReaderCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TableIndexReaderCache {
    /// Empty cache: no readers, no pending updates.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheState {
                cache_ts: 0,
                first_known_update_ts: UNCOMMIT_TS,
                last_known_update_ts: 0,
                cache_column_ts: HashMap::new(),
                cache_column_readers: Arc::new(HashMap::new()),
                column_analyzers: Arc::new(HashMap::new()),
            }),
        }
    }

    /// Record that an index-mutating commit at `ts` touched this table.
    ///
    /// `segment_update_ts` is the owning index entry's newest-mutation
    /// timestamp; it must not move backwards.
    pub fn update_known_update_ts(
        &self,
        ts: TxnTimestamp,
        segment_update_ts: &Mutex<TxnTimestamp>,
    ) -> Result<()> {
        let mut state = self.inner.lock();
        let mut entry_ts = segment_update_ts.lock();
        if ts < *entry_ts {
            return Err(TephraError::TimestampRegression {
                what: "index segment update",
                last: *entry_ts,
                new: ts,
            });
        }
        *entry_ts = ts;
        state.first_known_update_ts = state.first_known_update_ts.min(ts);
        state.last_known_update_ts = state.last_known_update_ts.max(ts);
        trace!(
            ts,
            first = state.first_known_update_ts,
            last = state.last_known_update_ts,
            "observed index update"
        );
        Ok(())
    }

    /// Readers for every fulltext index visible at `begin_ts`.
    ///
    /// Fast path: the cache is current for the snapshot, so the cached
    /// structures are returned by shared reference. Slow path: rebuild
    /// stale columns (reusing per-column readers whose build ts still
    /// matches) and promote the result to be the new cache once it has
    /// caught up past all known updates.
    pub fn get_index_reader(
        &self,
        vfs: &dyn Vfs,
        begin_ts: TxnTimestamp,
        metas: &[FulltextIndexMeta],
    ) -> Result<IndexReader> {
        let mut state = self.inner.lock();
        if begin_ts >= state.cache_ts && begin_ts < state.first_known_update_ts {
            trace!(begin_ts, cache_ts = state.cache_ts, "index reader cache hit");
            return Ok(IndexReader {
                column_index_readers: Arc::clone(&state.cache_column_readers),
                column_analyzers: Arc::clone(&state.column_analyzers),
            });
        }

        let mut column_ts: HashMap<ColumnId, TxnTimestamp> = HashMap::new();
        let mut readers: HashMap<ColumnId, Arc<ColumnIndexReader>> = HashMap::new();
        let mut analyzers: HashMap<String, String> = HashMap::new();
        for meta in metas {
            let ts = meta.segment_update_ts;
            let target = column_ts.entry(meta.column_id).or_insert(0);
            if *target >= ts && readers.contains_key(&meta.column_id) {
                continue;
            }
            *target = ts;
            analyzers.insert(meta.column_name.clone(), meta.analyzer.clone());
            let reuse = state
                .cache_column_ts
                .get(&meta.column_id)
                .is_some_and(|cached| *cached == ts)
                && state.cache_column_readers.contains_key(&meta.column_id);
            if reuse {
                let reader = Arc::clone(&state.cache_column_readers[&meta.column_id]);
                readers.insert(meta.column_id, reader);
            } else {
                debug!(
                    index = %meta.index_name,
                    column = %meta.column_name,
                    segment_update_ts = ts,
                    "building column index reader"
                );
                let reader = ColumnIndexReader::open(
                    vfs,
                    meta.flags,
                    meta.index_dir.clone(),
                    &meta.segments,
                )?;
                readers.insert(meta.column_id, Arc::new(reader));
            }
        }

        let result = IndexReader {
            column_index_readers: Arc::new(readers),
            column_analyzers: Arc::new(analyzers),
        };

        if begin_ts >= state.last_known_update_ts {
            // The fresh result reflects every known update; promote it.
            debug!(
                cache_ts = state.last_known_update_ts,
                "promoting index reader cache"
            );
            state.cache_ts = state.last_known_update_ts;
            state.first_known_update_ts = UNCOMMIT_TS;
            state.last_known_update_ts = 0;
            state.cache_column_ts = column_ts;
            state.cache_column_readers = Arc::clone(&result.column_index_readers);
            state.column_analyzers = Arc::clone(&result.column_analyzers);
        }
        Ok(result)
    }

    /// The snapshot the cache is materialized at (tests and diagnostics).
    #[must_use]
    pub fn cache_ts(&self) -> TxnTimestamp {
        self.inner.lock().cache_ts
    }
}
