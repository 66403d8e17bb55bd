//! Database entries.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tephra_error::{Result, TephraError};
use tephra_types::{TableDef, TxnId, TxnTimestamp};

use crate::entry::{EntryList, EntryRecord};
use crate::table::TableEntry;

/// One version of a database: a name, a directory, and its tables.
pub struct DbEntry {
    name: String,
    db_dir: PathBuf,
    tables: RwLock<BTreeMap<String, EntryList<TableEntry>>>,
}

impl DbEntry {
    /// New empty database rooted at `db_dir`.
    #[must_use]
    pub fn new(name: String, db_dir: PathBuf) -> Self {
        Self {
            name,
            db_dir,
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn db_dir(&self) -> &PathBuf {
        &self.db_dir
    }

    /// Create a table version at `commit_ts`.
    pub fn create_table_replay(
        &self,
        def: &TableDef,
        dir_tail: &str,
        txn_id: TxnId,
        commit_ts: TxnTimestamp,
    ) -> Result<Arc<TableEntry>> {
        let mut tables = self.tables.write();
        let list = tables.entry(def.table_name.clone()).or_default();
        if list.latest_live().is_some() {
            return Err(TephraError::TableExists {
                name: def.table_name.clone(),
            });
        }
        let entry = Arc::new(TableEntry::new(
            self.name.clone(),
            def.table_name.clone(),
            self.db_dir.join(dir_tail),
            def.columns.clone(),
        ));
        list.push_live(Arc::clone(&entry), txn_id, commit_ts);
        Ok(entry)
    }

    /// Drop a table version at `commit_ts`.
    pub fn drop_table_replay(
        &self,
        table_name: &str,
        txn_id: TxnId,
        commit_ts: TxnTimestamp,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        let list = tables
            .get_mut(table_name)
            .filter(|list| list.latest_live().is_some())
            .ok_or_else(|| TephraError::NoSuchTable {
                name: table_name.to_owned(),
            })?;
        list.push_dropped(txn_id, commit_ts);
        Ok(())
    }

    /// Table visible to a snapshot at `begin_ts`.
    pub fn get_table(&self, table_name: &str, begin_ts: TxnTimestamp) -> Result<Arc<TableEntry>> {
        self.tables
            .read()
            .get(table_name)
            .and_then(|list| list.visible(begin_ts))
            .cloned()
            .ok_or_else(|| TephraError::NoSuchTable {
                name: table_name.to_owned(),
            })
    }

    /// Newest live table (replay path).
    pub fn get_table_replay(&self, table_name: &str) -> Result<Arc<TableEntry>> {
        self.tables
            .read()
            .get(table_name)
            .and_then(EntryList::latest_live)
            .cloned()
            .ok_or_else(|| TephraError::NoSuchTable {
                name: table_name.to_owned(),
            })
    }

    /// Newest record per table name committed at or before `ts`, for
    /// snapshot persistence.
    #[must_use]
    pub fn table_records_visible(&self, ts: TxnTimestamp) -> Vec<(String, EntryRecord<TableEntry>)> {
        self.tables
            .read()
            .iter()
            .filter_map(|(name, list)| list.record_visible(ts).map(|r| (name.clone(), r.clone())))
            .collect()
    }

    /// Restore a table chain record from a catalog snapshot.
    pub fn restore_table(
        &self,
        name: String,
        entry: Option<Arc<TableEntry>>,
        txn_id: TxnId,
        commit_ts: TxnTimestamp,
    ) {
        let mut tables = self.tables.write();
        let list = tables.entry(name).or_default();
        match entry {
            Some(entry) => list.push_live(entry, txn_id, commit_ts),
            None => list.push_dropped(txn_id, commit_ts),
        }
    }
}

#[cfg(test)]
mod tests {
    use tephra_types::{ColumnDef, ValueType};

    use super::*;

    fn def() -> TableDef {
        TableDef {
            table_name: "books".to_owned(),
            columns: vec![ColumnDef {
                id: 0,
                name: "id".to_owned(),
                value_type: ValueType::Integer,
            }],
        }
    }

    #[test]
    fn create_then_drop_table_visibility() {
        let db = DbEntry::new("db0".to_owned(), PathBuf::from("data/db0"));
        db.create_table_replay(&def(), "books", 1, 10).expect("create");
        assert!(db.get_table("books", 10).is_ok());
        assert!(db.get_table("books", 5).is_err());

        db.drop_table_replay("books", 2, 20).expect("drop");
        assert!(db.get_table("books", 15).is_ok());
        assert!(db.get_table("books", 20).is_err());
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let db = DbEntry::new("db0".to_owned(), PathBuf::from("data/db0"));
        db.create_table_replay(&def(), "books", 1, 10).expect("create");
        let err = db.create_table_replay(&def(), "books", 2, 20).expect_err("dup");
        assert!(matches!(err, TephraError::TableExists { .. }));
    }

    #[test]
    fn recreate_after_drop_is_allowed() {
        let db = DbEntry::new("db0".to_owned(), PathBuf::from("data/db0"));
        db.create_table_replay(&def(), "books", 1, 10).expect("create");
        db.drop_table_replay("books", 2, 20).expect("drop");
        db.create_table_replay(&def(), "books.v2", 3, 30).expect("recreate");
        let table = db.get_table("books", 30).expect("visible again");
        assert_eq!(table.table_dir(), &PathBuf::from("data/db0/books.v2"));
    }
}
