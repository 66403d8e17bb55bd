//! End-to-end fulltext scenarios: reader cache sharing, invalidation and
//! promotion, and term lookups across segments through live transactions.

use std::sync::Arc;

use tephra_core::Storage;
use tephra_types::{
    ColumnDef, DataBlock, IndexDef, IndexType, OptionFlags, StorageConfig, TableDef, Value,
    ValueType,
};
use tephra_vfs::{MemoryVfs, Vfs};
use tephra_wal::CheckpointKind;

fn arc_vfs(vfs: &MemoryVfs) -> Arc<dyn Vfs> {
    Arc::new(vfs.clone())
}

fn docs_def() -> TableDef {
    TableDef {
        table_name: "docs".to_owned(),
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

fn body_index() -> IndexDef {
    IndexDef {
        index_name: "idx_body".to_owned(),
        index_type: IndexType::FullText,
        column_name: "body".to_owned(),
        analyzer: "standard".to_owned(),
        flags: OptionFlags::default(),
    }
}

fn row_block(id: i64, body: &str) -> DataBlock {
    DataBlock::new(vec![
        vec![Value::Integer(id)],
        vec![Value::Varchar(body.to_owned())],
    ])
    .expect("rectangular")
}

fn open_with_index(vfs: &MemoryVfs, root: &str) -> Storage {
    let storage = Storage::open(arc_vfs(vfs), StorageConfig::with_root(root)).expect("open");
    let mut txn = storage.begin_txn();
    txn.create_database("db0");
    txn.create_table("db0", docs_def());
    txn.create_index("db0", "docs", body_index());
    txn.commit().expect("schema commit");
    storage
}

#[test]
fn lookup_finds_documents_across_appends() {
    let vfs = MemoryVfs::new();
    let storage = open_with_index(&vfs, "ft1");

    let mut txn = storage.begin_txn();
    txn.append("db0", "docs", row_block(1, "write ahead logging"));
    txn.commit().expect("commit");
    let mut txn = storage.begin_txn();
    txn.append("db0", "docs", row_block(2, "ahead of the curve"));
    txn.commit().expect("commit");

    let txn = storage.begin_txn();
    let reader = txn.get_index_reader("db0", "docs").expect("reader");
    let column = reader.column_reader(1).expect("body column");
    let mut iter = column.lookup("ahead").expect("term present");
    let first = iter.next_doc().expect("doc 0");
    let second = iter.next_doc().expect("doc 1");
    assert!(first < second, "docs must come back in row order");
    assert_eq!(iter.next_doc(), None);
    assert!(column.lookup("absent").is_none());
    assert_eq!(reader.analyzer("body"), Some("standard"));
    txn.commit().expect("read-only");
    storage.stop().expect("stop");
}

#[test]
fn reader_cache_shares_and_promotes() {
    let vfs = MemoryVfs::new();
    let storage = open_with_index(&vfs, "ft2");
    let mut txn = storage.begin_txn();
    txn.append("db0", "docs", row_block(1, "stable corpus"));
    txn.commit().expect("commit");

    // Two reads at the same snapshot share the same reader structures.
    let txn_a = storage.begin_txn();
    let txn_b = storage.begin_txn();
    let reader_a = txn_a.get_index_reader("db0", "docs").expect("reader");
    let reader_b = txn_b.get_index_reader("db0", "docs").expect("reader");
    assert!(Arc::ptr_eq(
        &reader_a.column_index_readers,
        &reader_b.column_index_readers
    ));
    txn_b.commit().expect("read-only");

    // A mutation lands; the old snapshot still fast-paths to the cache.
    let mut writer = storage.begin_txn();
    writer.append("db0", "docs", row_block(2, "fresh update"));
    writer.commit().expect("commit");
    let reader_a_again = txn_a.get_index_reader("db0", "docs").expect("reader");
    assert!(Arc::ptr_eq(
        &reader_a.column_index_readers,
        &reader_a_again.column_index_readers
    ));
    txn_a.commit().expect("read-only");

    // A snapshot past the mutation rebuilds and becomes the new cache.
    let txn_c = storage.begin_txn();
    let reader_c = txn_c.get_index_reader("db0", "docs").expect("reader");
    assert!(!Arc::ptr_eq(
        &reader_a.column_index_readers,
        &reader_c.column_index_readers
    ));
    let column = reader_c.column_reader(1).expect("body column");
    assert!(column.lookup("fresh").is_some());
    txn_c.commit().expect("read-only");

    let txn_d = storage.begin_txn();
    let reader_d = txn_d.get_index_reader("db0", "docs").expect("reader");
    assert!(Arc::ptr_eq(
        &reader_c.column_index_readers,
        &reader_d.column_index_readers
    ));
    txn_d.commit().expect("read-only");
    storage.stop().expect("stop");
}

#[test]
fn snapshot_readers_resolve_against_their_begin_ts() {
    let vfs = MemoryVfs::new();
    let storage = open_with_index(&vfs, "ft3");
    let mut txn = storage.begin_txn();
    txn.append("db0", "docs", row_block(1, "visible baseline"));
    txn.commit().expect("commit");

    // Snapshot taken before the second append.
    let old_txn = storage.begin_txn();

    let mut writer = storage.begin_txn();
    writer.append("db0", "docs", row_block(2, "late arrival"));
    writer.commit().expect("commit");

    // The old snapshot resolves its readers against its own begin_ts and
    // still sees the baseline document.
    let reader = old_txn.get_index_reader("db0", "docs").expect("reader");
    let column = reader.column_reader(1).expect("body column");
    assert!(column.lookup("baseline").is_some());
    // A snapshot past the second commit sees the new term.
    let fresh = storage.begin_txn();
    let fresh_reader = fresh.get_index_reader("db0", "docs").expect("reader");
    assert!(fresh_reader
        .column_reader(1)
        .expect("body column")
        .lookup("late")
        .is_some());
    fresh.commit().expect("read-only");
    old_txn.commit().expect("read-only");
    storage.stop().expect("stop");
}

#[test]
fn block_max_lookup_scores_with_weight() {
    let vfs = MemoryVfs::new();
    let storage = open_with_index(&vfs, "ft4");
    let mut txn = storage.begin_txn();
    txn.append("db0", "docs", row_block(1, "ranking ranking ranking"));
    txn.commit().expect("commit");

    let txn = storage.begin_txn();
    let reader = txn.get_index_reader("db0", "docs").expect("reader");
    let column = reader.column_reader(1).expect("body column");
    let mut iter = column.lookup_block_max("ranking", 0.5).expect("term");
    iter.next_doc().expect("doc");
    // tf 3 at weight 0.5.
    assert!((iter.score() - 1.5).abs() < f32::EPSILON);
    assert!(iter.block_max_score() >= iter.score());
    let avg = column.avg_column_length().expect("documents indexed");
    assert!((avg - 3.0).abs() < 1e-6);
    txn.commit().expect("read-only");
    storage.stop().expect("stop");
}

#[test]
fn fulltext_survives_restart_for_post_checkpoint_appends() {
    let vfs = MemoryVfs::new();
    let cfg = StorageConfig::with_root("ft5");
    let storage = Storage::open(arc_vfs(&vfs), cfg.clone()).expect("open");
    let mut txn = storage.begin_txn();
    txn.create_database("db0");
    txn.create_table("db0", docs_def());
    txn.create_index("db0", "docs", body_index());
    txn.commit().expect("schema commit");
    storage.force_checkpoint(CheckpointKind::Full).expect("checkpoint");

    let mut txn = storage.begin_txn();
    txn.append("db0", "docs", row_block(1, "replayed and searchable"));
    txn.commit().expect("commit");
    storage.stop().expect("stop");

    let reopened = Storage::open(arc_vfs(&vfs), cfg).expect("reopen");
    let txn = reopened.begin_txn();
    let reader = txn.get_index_reader("db0", "docs").expect("reader");
    let column = reader.column_reader(1).expect("body column");
    assert!(column.lookup("searchable").is_some());
    txn.commit().expect("read-only");
    reopened.stop().expect("stop");
}
