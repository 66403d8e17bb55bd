//! Catalog snapshot persistence.
//!
//! A checkpoint persists the catalog as JSON: a full snapshot
//! (`full.catalog.<ts>.json`) carries everything committed at or before
//! the checkpoint's `max_commit_ts`; a delta snapshot
//! (`delta.catalog.<ts>.json`) carries only subtrees changed since the
//! last full snapshot. Recovery loads the newest valid full snapshot for a
//! checkpoint and re-applies its deltas in timestamp order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tephra_error::{Result, TephraError};
use tephra_types::{
    BlockId, ColumnDef, IndexDef, RowId, SegmentId, SegmentStatus, TxnId, TxnTimestamp,
};
use tephra_vfs::Vfs;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::db::DbEntry;
use crate::index_entry::{SegmentIndexEntry, TableIndexEntry};
use crate::table::{BlockEntry, SegmentEntry, TableEntry};

// ---------------------------------------------------------------------------
// File naming
// ---------------------------------------------------------------------------

/// Snapshot flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotKind {
    Full,
    Delta,
}

/// `full.catalog.<ts>.json`
#[must_use]
pub fn full_snapshot_name(ts: TxnTimestamp) -> String {
    format!("full.catalog.{ts}.json")
}

/// `delta.catalog.<ts>.json`
#[must_use]
pub fn delta_snapshot_name(ts: TxnTimestamp) -> String {
    format!("delta.catalog.{ts}.json")
}

/// Parse a snapshot file name into its kind and timestamp.
#[must_use]
pub fn parse_snapshot_name(name: &str) -> Option<(SnapshotKind, TxnTimestamp)> {
    let (kind, rest) = if let Some(rest) = name.strip_prefix("full.catalog.") {
        (SnapshotKind::Full, rest)
    } else if let Some(rest) = name.strip_prefix("delta.catalog.") {
        (SnapshotKind::Delta, rest)
    } else {
        return None;
    };
    let ts = rest.strip_suffix(".json")?.parse().ok()?;
    Some((kind, ts))
}

/// Locate the snapshot files valid for a checkpoint at `checkpoint_ts`:
/// the newest full snapshot at or before it, plus that snapshot's deltas
/// up to the checkpoint, oldest first.
pub fn find_valid_snapshot_files(
    vfs: &dyn Vfs,
    catalog_dir: &Path,
    checkpoint_ts: TxnTimestamp,
) -> Result<(PathBuf, Vec<PathBuf>)> {
    let mut full: Option<TxnTimestamp> = None;
    let mut deltas: Vec<TxnTimestamp> = Vec::new();
    for name in vfs.list_dir(catalog_dir)? {
        match parse_snapshot_name(&name) {
            Some((SnapshotKind::Full, ts)) if ts <= checkpoint_ts => {
                full = Some(full.map_or(ts, |cur| cur.max(ts)));
            }
            Some((SnapshotKind::Delta, ts)) if ts <= checkpoint_ts => deltas.push(ts),
            _ => {}
        }
    }
    let full_ts = full.ok_or_else(|| TephraError::CatalogCorrupt {
        detail: format!(
            "no full catalog snapshot at or before ts {checkpoint_ts} in {}",
            catalog_dir.display()
        ),
    })?;
    deltas.retain(|ts| *ts > full_ts);
    deltas.sort_unstable();
    Ok((
        vfs.join(catalog_dir, &full_snapshot_name(full_ts)),
        deltas
            .into_iter()
            .map(|ts| vfs.join(catalog_dir, &delta_snapshot_name(ts)))
            .collect(),
    ))
}

/// Delete snapshot files made obsolete by a full snapshot at `full_ts`:
/// older full snapshots and every delta at or before it.
pub fn recycle_snapshot_files(
    vfs: &dyn Vfs,
    catalog_dir: &Path,
    full_ts: TxnTimestamp,
) -> Result<()> {
    for name in vfs.list_dir(catalog_dir)? {
        let obsolete = match parse_snapshot_name(&name) {
            Some((SnapshotKind::Full, ts)) => ts < full_ts,
            Some((SnapshotKind::Delta, ts)) => ts <= full_ts,
            None => false,
        };
        if obsolete {
            debug!(file = %name, "recycling catalog snapshot file");
            vfs.delete(&vfs.join(catalog_dir, &name))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Snapshot payload
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct CatalogSnapshot {
    kind: SnapshotKind,
    max_commit_ts: TxnTimestamp,
    next_txn_id: TxnId,
    last_ts: TxnTimestamp,
    dbs: Vec<DbSnap>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DbSnap {
    name: String,
    dir: PathBuf,
    dropped: bool,
    txn_id: TxnId,
    commit_ts: TxnTimestamp,
    tables: Vec<TableSnap>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableSnap {
    name: String,
    dir: PathBuf,
    dropped: bool,
    txn_id: TxnId,
    commit_ts: TxnTimestamp,
    columns: Vec<ColumnDef>,
    row_count: u64,
    segments: Vec<SegmentSnap>,
    indexes: Vec<IndexSnap>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentSnap {
    segment_id: SegmentId,
    status: SegmentStatus,
    row_capacity: u64,
    column_count: u64,
    commit_ts: TxnTimestamp,
    deprecate_ts: TxnTimestamp,
    row_count: u64,
    actual_row_count: u64,
    blocks: Vec<BlockSnap>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockSnap {
    block_id: BlockId,
    start_offset: u64,
    row_capacity: u64,
    row_count: u64,
    outline_infos: Vec<(u32, u64)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexSnap {
    name: String,
    dropped: bool,
    txn_id: TxnId,
    commit_ts: TxnTimestamp,
    def: Option<IndexDef>,
    dir: PathBuf,
    segment_update_ts: TxnTimestamp,
    segments: Vec<SegmentIndexSnap>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentIndexSnap {
    segment_id: SegmentId,
    sealed: Vec<(String, u64)>,
    column_length_sum: u64,
    document_count: u32,
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

fn snap_table(
    name: &str,
    record_ts: (TxnId, TxnTimestamp),
    table: &TableEntry,
    max_commit_ts: TxnTimestamp,
) -> TableSnap {
    let segments = table
        .segments()
        .iter()
        .filter(|segment| segment.commit_ts() <= max_commit_ts)
        .map(|segment| SegmentSnap {
            segment_id: segment.segment_id(),
            status: segment.status(),
            row_capacity: segment.row_capacity(),
            column_count: segment.column_count(),
            commit_ts: segment.commit_ts(),
            deprecate_ts: segment.deprecate_ts(),
            row_count: segment.row_count(),
            actual_row_count: segment.actual_row_count(),
            blocks: segment
                .blocks()
                .iter()
                .map(|block| BlockSnap {
                    block_id: block.block_id,
                    start_offset: block.start_offset,
                    row_capacity: block.row_capacity,
                    row_count: block.row_count,
                    outline_infos: block.outline_infos.clone(),
                })
                .collect(),
        })
        .collect();
    let indexes = table
        .index_records_visible(max_commit_ts)
        .into_iter()
        .map(|(index_name, record)| match record.inner {
            Some(entry) => IndexSnap {
                name: index_name,
                dropped: false,
                txn_id: record.txn_id,
                commit_ts: record.commit_ts,
                def: Some(entry.def().clone()),
                dir: entry.index_dir().clone(),
                segment_update_ts: *entry.segment_update_ts.lock(),
                segments: entry
                    .segment_entries()
                    .iter()
                    .map(|seg| {
                        let (sealed, column_length_sum, document_count) = seg.sealed_state();
                        SegmentIndexSnap {
                            segment_id: seg.segment_id(),
                            sealed: sealed
                                .into_iter()
                                .map(|(base, row)| (base, row.get()))
                                .collect(),
                            column_length_sum,
                            document_count,
                        }
                    })
                    .collect(),
            },
            None => IndexSnap {
                name: index_name,
                dropped: true,
                txn_id: record.txn_id,
                commit_ts: record.commit_ts,
                def: None,
                dir: PathBuf::new(),
                segment_update_ts: 0,
                segments: Vec::new(),
            },
        })
        .collect();
    TableSnap {
        name: name.to_owned(),
        dir: table.table_dir().clone(),
        dropped: false,
        txn_id: record_ts.0,
        commit_ts: record_ts.1,
        columns: table.columns().to_vec(),
        row_count: table.row_count(),
        segments,
        indexes,
    }
}

impl Catalog {
    fn capture(&self, kind: SnapshotKind, max_commit_ts: TxnTimestamp) -> CatalogSnapshot {
        let baseline = match kind {
            SnapshotKind::Full => 0,
            SnapshotKind::Delta => self.delta_baseline_ts(),
        };
        let mut dbs = Vec::new();
        for (db_name, record) in self.db_records_visible(max_commit_ts) {
            let Some(db) = &record.inner else {
                if record.commit_ts > baseline {
                    dbs.push(DbSnap {
                        name: db_name,
                        dir: PathBuf::new(),
                        dropped: true,
                        txn_id: record.txn_id,
                        commit_ts: record.commit_ts,
                        tables: Vec::new(),
                    });
                }
                continue;
            };
            let mut tables = Vec::new();
            for (table_name, table_record) in db.table_records_visible(max_commit_ts) {
                match &table_record.inner {
                    Some(table) => {
                        let changed = table_record.commit_ts > baseline
                            || table.last_change_ts() > baseline;
                        if changed {
                            tables.push(snap_table(
                                &table_name,
                                (table_record.txn_id, table_record.commit_ts),
                                table,
                                max_commit_ts,
                            ));
                        }
                    }
                    None => {
                        if table_record.commit_ts > baseline {
                            tables.push(TableSnap {
                                name: table_name,
                                dir: PathBuf::new(),
                                dropped: true,
                                txn_id: table_record.txn_id,
                                commit_ts: table_record.commit_ts,
                                columns: Vec::new(),
                                row_count: 0,
                                segments: Vec::new(),
                                indexes: Vec::new(),
                            });
                        }
                    }
                }
            }
            if record.commit_ts > baseline || !tables.is_empty() {
                dbs.push(DbSnap {
                    name: db_name,
                    dir: db.db_dir().clone(),
                    dropped: false,
                    txn_id: record.txn_id,
                    commit_ts: record.commit_ts,
                    tables,
                });
            }
        }
        CatalogSnapshot {
            kind,
            max_commit_ts,
            next_txn_id: self.next_txn_id(),
            last_ts: self.current_ts(),
            dbs,
        }
    }

    fn write_snapshot(&self, snapshot: &CatalogSnapshot, name: &str) -> Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(|err| {
            TephraError::internal(format!("catalog snapshot serialization failed: {err}"))
        })?;
        let path = self.vfs().join(self.catalog_dir(), name);
        self.vfs().write_all(&path, &bytes)?;
        info!(
            path = %path.display(),
            kind = ?snapshot.kind,
            max_commit_ts = snapshot.max_commit_ts,
            dbs = snapshot.dbs.len(),
            "persisted catalog snapshot"
        );
        Ok(path)
    }

    /// Persist a full snapshot of everything committed at or before
    /// `max_commit_ts` and reset the delta baseline.
    pub fn save_full(&self, max_commit_ts: TxnTimestamp) -> Result<PathBuf> {
        let snapshot = self.capture(SnapshotKind::Full, max_commit_ts);
        let path = self.write_snapshot(&snapshot, &full_snapshot_name(max_commit_ts))?;
        self.init_delta_entry(max_commit_ts);
        Ok(path)
    }

    /// Persist a delta snapshot of subtrees changed since the last full
    /// snapshot.
    pub fn save_delta(&self, max_commit_ts: TxnTimestamp) -> Result<PathBuf> {
        let snapshot = self.capture(SnapshotKind::Delta, max_commit_ts);
        self.write_snapshot(&snapshot, &delta_snapshot_name(max_commit_ts))
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    fn apply_snapshot(&self, snapshot: &CatalogSnapshot) {
        for db_snap in &snapshot.dbs {
            if db_snap.dropped {
                self.restore_database(db_snap.name.clone(), None, db_snap.txn_id, db_snap.commit_ts);
                continue;
            }
            // Reuse the live entry on delta application so earlier tables
            // survive; otherwise restore a fresh one.
            let db = match self.get_database_replay(&db_snap.name) {
                Ok(db) => db,
                Err(_) => {
                    let db = Arc::new(DbEntry::new(db_snap.name.clone(), db_snap.dir.clone()));
                    self.restore_database(
                        db_snap.name.clone(),
                        Some(Arc::clone(&db)),
                        db_snap.txn_id,
                        db_snap.commit_ts,
                    );
                    db
                }
            };
            for table_snap in &db_snap.tables {
                if table_snap.dropped {
                    db.restore_table(
                        table_snap.name.clone(),
                        None,
                        table_snap.txn_id,
                        table_snap.commit_ts,
                    );
                    continue;
                }
                let table = Arc::new(restore_table(&db_snap.name, table_snap));
                db.restore_table(
                    table_snap.name.clone(),
                    Some(table),
                    table_snap.txn_id,
                    table_snap.commit_ts,
                );
            }
        }
        self.set_next_txn_id(snapshot.next_txn_id);
        self.advance_ts(snapshot.last_ts);
    }

    /// Load the catalog state referenced by a checkpoint: the newest valid
    /// full snapshot plus its deltas.
    pub fn load(
        vfs: Arc<dyn Vfs>,
        data_dir: PathBuf,
        catalog_dir: PathBuf,
        checkpoint_ts: TxnTimestamp,
    ) -> Result<Catalog> {
        let (full_path, delta_paths) =
            find_valid_snapshot_files(vfs.as_ref(), &catalog_dir, checkpoint_ts)?;
        let catalog = Catalog::new(Arc::clone(&vfs), data_dir, catalog_dir);

        let full = read_snapshot(vfs.as_ref(), &full_path)?;
        if full.kind != SnapshotKind::Full {
            return Err(TephraError::CatalogCorrupt {
                detail: format!("{} is not a full snapshot", full_path.display()),
            });
        }
        catalog.apply_snapshot(&full);
        for delta_path in &delta_paths {
            let delta = read_snapshot(vfs.as_ref(), delta_path)?;
            if delta.kind != SnapshotKind::Delta {
                warn!(path = %delta_path.display(), "skipping non-delta snapshot");
                continue;
            }
            catalog.apply_snapshot(&delta);
        }
        catalog.init_delta_entry(full.max_commit_ts);
        info!(
            full = %full_path.display(),
            deltas = delta_paths.len(),
            "catalog loaded from snapshot"
        );
        Ok(catalog)
    }
}

fn read_snapshot(vfs: &dyn Vfs, path: &Path) -> Result<CatalogSnapshot> {
    let bytes = vfs.read_all(path).map_err(|err| TephraError::CatalogCorrupt {
        detail: format!("cannot read {}: {err}", path.display()),
    })?;
    serde_json::from_slice(&bytes).map_err(|err| TephraError::CatalogCorrupt {
        detail: format!("cannot parse {}: {err}", path.display()),
    })
}

fn restore_table(db_name: &str, snap: &TableSnap) -> TableEntry {
    let table = TableEntry::new(
        db_name.to_owned(),
        snap.name.clone(),
        snap.dir.clone(),
        snap.columns.clone(),
    );
    for segment_snap in &snap.segments {
        let blocks = segment_snap
            .blocks
            .iter()
            .map(|b| {
                Arc::new(BlockEntry {
                    block_id: b.block_id,
                    start_offset: b.start_offset,
                    row_capacity: b.row_capacity,
                    row_count: b.row_count,
                    outline_infos: b.outline_infos.clone(),
                })
            })
            .collect();
        table.restore_segment(Arc::new(SegmentEntry::restore(
            segment_snap.segment_id,
            segment_snap.status,
            segment_snap.row_capacity,
            segment_snap.column_count,
            segment_snap.commit_ts,
            segment_snap.deprecate_ts,
            segment_snap.row_count,
            segment_snap.actual_row_count,
            blocks,
        )));
    }
    for index_snap in &snap.indexes {
        if index_snap.dropped {
            table.restore_index(
                index_snap.name.clone(),
                None,
                index_snap.txn_id,
                index_snap.commit_ts,
            );
            continue;
        }
        let def = index_snap.def.clone().unwrap_or_else(|| IndexDef {
            // A live snapshot always carries its definition; this stub only
            // keeps deserialization total.
            index_name: index_snap.name.clone(),
            index_type: tephra_types::IndexType::Secondary,
            column_name: String::new(),
            analyzer: String::new(),
            flags: tephra_types::OptionFlags::empty(),
        });
        let entry = Arc::new(TableIndexEntry::new(def, index_snap.dir.clone()));
        *entry.segment_update_ts.lock() = index_snap.segment_update_ts;
        for seg_snap in &index_snap.segments {
            let seg_entry = Arc::new(SegmentIndexEntry::new(seg_snap.segment_id));
            for (base_name, base_row) in &seg_snap.sealed {
                seg_entry.add_sealed(base_name.clone(), RowId::new(*base_row), 0, 0);
            }
            // Length accounting is persisted segment-wide, not per
            // sub-segment.
            seg_entry.set_sealed_totals(seg_snap.column_length_sum, seg_snap.document_count);
            entry.restore_segment_index(seg_entry);
        }
        table.restore_index(
            index_snap.name.clone(),
            Some(entry),
            index_snap.txn_id,
            index_snap.commit_ts,
        );
    }
    table.restore_row_count(snap.row_count);
    table.touch(snap.commit_ts);
    table
}

#[cfg(test)]
mod tests {
    use tephra_types::{ColumnDef, DataBlock, IndexType, OptionFlags, TableDef, Value, ValueType};
    use tephra_vfs::MemoryVfs;

    use super::*;
    use crate::buffer::BufferManager;

    fn table_def() -> TableDef {
        TableDef {
            table_name: "books".to_owned(),
            columns: vec![
                ColumnDef {
                    id: 0,
                    name: "id".to_owned(),
                    value_type: ValueType::Integer,
                },
                ColumnDef {
                    id: 1,
                    name: "body".to_owned(),
                    value_type: ValueType::Varchar,
                },
            ],
        }
    }

    fn populated_catalog(vfs: &Arc<dyn Vfs>) -> Catalog {
        let catalog = Catalog::new(
            Arc::clone(vfs),
            PathBuf::from("data"),
            PathBuf::from("catalog"),
        );
        let db = catalog
            .create_database_replay("db0", "db0", 1, 10)
            .expect("db");
        let table = db
            .create_table_replay(&table_def(), "books", 1, 11)
            .expect("table");
        let buffer = BufferManager::new();
        let block = DataBlock::new(vec![
            vec![Value::Integer(1), Value::Integer(2)],
            vec![
                Value::Varchar("a".to_owned()),
                Value::Varchar("b".to_owned()),
            ],
        ])
        .expect("block");
        table.append(&buffer, &block, 12).expect("append");
        table.touch(12);
        let index = table
            .create_index_replay(
                IndexDef {
                    index_name: "idx_body".to_owned(),
                    index_type: IndexType::FullText,
                    column_name: "body".to_owned(),
                    analyzer: "standard".to_owned(),
                    flags: OptionFlags::default(),
                },
                "idx_body",
                2,
                13,
            )
            .expect("index");
        table.build_fulltext_index(&buffer, &index, 13).expect("build");
        table.touch(13);
        catalog.advance_ts(13);
        catalog.set_next_txn_id(3);
        catalog
    }

    #[test]
    fn snapshot_name_round_trip() {
        assert_eq!(
            parse_snapshot_name(&full_snapshot_name(42)),
            Some((SnapshotKind::Full, 42))
        );
        assert_eq!(
            parse_snapshot_name(&delta_snapshot_name(7)),
            Some((SnapshotKind::Delta, 7))
        );
        assert_eq!(parse_snapshot_name("wal.log"), None);
        assert_eq!(parse_snapshot_name("full.catalog.x.json"), None);
    }

    #[test]
    fn full_save_then_load_restores_catalog() {
        let vfs: Arc<dyn Vfs> = Arc::new(MemoryVfs::new());
        let catalog = populated_catalog(&vfs);
        catalog.save_full(13).expect("save");

        let restored = Catalog::load(
            Arc::clone(&vfs),
            PathBuf::from("data"),
            PathBuf::from("catalog"),
            13,
        )
        .expect("load");
        assert_eq!(restored.next_txn_id(), 3);
        let table = restored.get_table("db0", "books", 13).expect("table");
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.segments().len(), 1);
        let index = table.get_index_replay("idx_body").expect("index");
        assert_eq!(*index.segment_update_ts.lock(), 13);
    }

    #[test]
    fn delta_snapshot_contains_only_changes() {
        let vfs: Arc<dyn Vfs> = Arc::new(MemoryVfs::new());
        let catalog = populated_catalog(&vfs);
        catalog.save_full(13).expect("full");

        // Create a second database after the full snapshot.
        catalog
            .create_database_replay("db1", "db1", 3, 20)
            .expect("db1");
        let delta = catalog.capture(SnapshotKind::Delta, 20);
        assert_eq!(delta.dbs.len(), 1);
        assert_eq!(delta.dbs[0].name, "db1");
        catalog.save_delta(20).expect("delta");

        let restored = Catalog::load(
            Arc::clone(&vfs),
            PathBuf::from("data"),
            PathBuf::from("catalog"),
            20,
        )
        .expect("load");
        assert!(restored.get_database("db0", 20).is_ok());
        assert!(restored.get_database("db1", 20).is_ok());
    }

    #[test]
    fn table_drop_survives_delta_reload() {
        let vfs: Arc<dyn Vfs> = Arc::new(MemoryVfs::new());
        let catalog = populated_catalog(&vfs);
        catalog.save_full(13).expect("full");

        let db = catalog.get_database_replay("db0").expect("db");
        db.drop_table_replay("books", 4, 25).expect("drop");
        catalog.save_delta(25).expect("delta");

        let restored = Catalog::load(
            Arc::clone(&vfs),
            PathBuf::from("data"),
            PathBuf::from("catalog"),
            25,
        )
        .expect("load");
        assert!(restored.get_table("db0", "books", 30).is_err());
        assert!(restored.get_table("db0", "books", 20).is_ok());
    }

    #[test]
    fn recycle_keeps_current_full_and_newer_deltas() {
        let vfs: Arc<dyn Vfs> = Arc::new(MemoryVfs::new());
        let catalog = populated_catalog(&vfs);
        catalog.save_full(13).expect("full 13");
        catalog.save_delta(20).expect("delta 20");
        catalog.save_full(30).expect("full 30");
        catalog.save_delta(40).expect("delta 40");

        recycle_snapshot_files(vfs.as_ref(), &PathBuf::from("catalog"), 30).expect("recycle");
        let names = vfs.list_dir(&PathBuf::from("catalog")).expect("list");
        assert_eq!(
            names,
            vec![delta_snapshot_name(40), full_snapshot_name(30)]
        );
    }

    #[test]
    fn missing_full_snapshot_is_catalog_corruption() {
        let vfs: Arc<dyn Vfs> = Arc::new(MemoryVfs::new());
        let err = find_valid_snapshot_files(vfs.as_ref(), &PathBuf::from("catalog"), 10)
            .expect_err("empty dir");
        assert!(matches!(err, TephraError::CatalogCorrupt { .. }));
    }
}
