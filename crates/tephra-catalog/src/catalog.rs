//! The catalog root: name resolution, id/timestamp allocation, and the
//! delta-snapshot baseline.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tephra_error::{Result, TephraError};
use tephra_types::{TxnId, TxnTimestamp};
use tephra_vfs::Vfs;
use tracing::info;

use crate::db::DbEntry;
use crate::entry::{EntryList, EntryRecord};
use crate::table::TableEntry;

/// In-memory catalog root.
pub struct Catalog {
    vfs: Arc<dyn Vfs>,
    data_dir: PathBuf,
    catalog_dir: PathBuf,
    dbs: RwLock<BTreeMap<String, EntryList<DbEntry>>>,
    /// Next transaction id to hand out; replay seeds it from the last
    /// replayed entry.
    next_txn_id: AtomicU64,
    /// Last allocated commit/begin timestamp.
    last_ts: AtomicU64,
    /// Commits at or before this timestamp are covered by the last full
    /// snapshot; delta snapshots persist everything newer.
    delta_baseline_ts: AtomicU64,
}

impl Catalog {
    /// Fresh empty catalog.
    #[must_use]
    pub fn new(vfs: Arc<dyn Vfs>, data_dir: PathBuf, catalog_dir: PathBuf) -> Self {
        info!(data_dir = %data_dir.display(), "initializing new catalog");
        Self {
            vfs,
            data_dir,
            catalog_dir,
            dbs: RwLock::new(BTreeMap::new()),
            next_txn_id: AtomicU64::new(1),
            last_ts: AtomicU64::new(0),
            delta_baseline_ts: AtomicU64::new(0),
        }
    }

    /// The VFS every catalog I/O goes through.
    #[must_use]
    pub fn vfs(&self) -> &Arc<dyn Vfs> {
        &self.vfs
    }

    /// Root directory for table data.
    #[must_use]
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Directory holding catalog snapshot files.
    #[must_use]
    pub fn catalog_dir(&self) -> &PathBuf {
        &self.catalog_dir
    }

    // -- Id / timestamp allocation ------------------------------------------

    /// Hand out the next transaction id.
    pub fn allocate_txn_id(&self) -> TxnId {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Seed the transaction id counter (replay).
    pub fn set_next_txn_id(&self, next: TxnId) {
        self.next_txn_id.store(next, Ordering::SeqCst);
    }

    /// Next transaction id that would be handed out.
    #[must_use]
    pub fn next_txn_id(&self) -> TxnId {
        self.next_txn_id.load(Ordering::SeqCst)
    }

    /// Allocate a strictly increasing timestamp (begin or commit).
    pub fn allocate_ts(&self) -> TxnTimestamp {
        self.last_ts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last allocated timestamp.
    #[must_use]
    pub fn current_ts(&self) -> TxnTimestamp {
        self.last_ts.load(Ordering::SeqCst)
    }

    /// Fast-forward the timestamp allocator (replay).
    pub fn advance_ts(&self, ts: TxnTimestamp) {
        self.last_ts.fetch_max(ts, Ordering::SeqCst);
    }

    /// Seed the delta-snapshot baseline after a full snapshot or replay.
    pub fn init_delta_entry(&self, ts: TxnTimestamp) {
        self.delta_baseline_ts.store(ts, Ordering::SeqCst);
    }

    /// Commits after this timestamp are not in the last full snapshot.
    #[must_use]
    pub fn delta_baseline_ts(&self) -> TxnTimestamp {
        self.delta_baseline_ts.load(Ordering::SeqCst)
    }

    // -- Databases ----------------------------------------------------------

    /// Create a database version at `commit_ts`.
    pub fn create_database_replay(
        &self,
        db_name: &str,
        dir_tail: &str,
        txn_id: TxnId,
        commit_ts: TxnTimestamp,
    ) -> Result<Arc<DbEntry>> {
        let mut dbs = self.dbs.write();
        let list = dbs.entry(db_name.to_owned()).or_default();
        if list.latest_live().is_some() {
            return Err(TephraError::DatabaseExists {
                name: db_name.to_owned(),
            });
        }
        let entry = Arc::new(DbEntry::new(
            db_name.to_owned(),
            self.data_dir.join(dir_tail),
        ));
        list.push_live(Arc::clone(&entry), txn_id, commit_ts);
        Ok(entry)
    }

    /// Drop a database version at `commit_ts`.
    pub fn drop_database_replay(
        &self,
        db_name: &str,
        txn_id: TxnId,
        commit_ts: TxnTimestamp,
    ) -> Result<()> {
        let mut dbs = self.dbs.write();
        let list = dbs
            .get_mut(db_name)
            .filter(|list| list.latest_live().is_some())
            .ok_or_else(|| TephraError::NoSuchDatabase {
                name: db_name.to_owned(),
            })?;
        list.push_dropped(txn_id, commit_ts);
        Ok(())
    }

    /// Database visible to a snapshot at `begin_ts`.
    pub fn get_database(&self, db_name: &str, begin_ts: TxnTimestamp) -> Result<Arc<DbEntry>> {
        self.dbs
            .read()
            .get(db_name)
            .and_then(|list| list.visible(begin_ts))
            .cloned()
            .ok_or_else(|| TephraError::NoSuchDatabase {
                name: db_name.to_owned(),
            })
    }

    /// Newest live database (replay path).
    pub fn get_database_replay(&self, db_name: &str) -> Result<Arc<DbEntry>> {
        self.dbs
            .read()
            .get(db_name)
            .and_then(EntryList::latest_live)
            .cloned()
            .ok_or_else(|| TephraError::NoSuchDatabase {
                name: db_name.to_owned(),
            })
    }

    /// Table visible to a snapshot at `begin_ts`.
    pub fn get_table(
        &self,
        db_name: &str,
        table_name: &str,
        begin_ts: TxnTimestamp,
    ) -> Result<Arc<TableEntry>> {
        self.get_database(db_name, begin_ts)?
            .get_table(table_name, begin_ts)
    }

    /// Newest live table (replay path).
    pub fn get_table_replay(&self, db_name: &str, table_name: &str) -> Result<Arc<TableEntry>> {
        self.get_database_replay(db_name)?.get_table_replay(table_name)
    }

    /// Newest record per database name committed at or before `ts`, for
    /// snapshot persistence. Commits that land mid-checkpoint are newer
    /// than the captured `max_commit_ts` and must not leak in.
    #[must_use]
    pub fn db_records_visible(&self, ts: TxnTimestamp) -> Vec<(String, EntryRecord<DbEntry>)> {
        self.dbs
            .read()
            .iter()
            .filter_map(|(name, list)| list.record_visible(ts).map(|r| (name.clone(), r.clone())))
            .collect()
    }

    /// Restore a database chain record from a catalog snapshot.
    pub fn restore_database(
        &self,
        name: String,
        entry: Option<Arc<DbEntry>>,
        txn_id: TxnId,
        commit_ts: TxnTimestamp,
    ) {
        let mut dbs = self.dbs.write();
        let list = dbs.entry(name).or_default();
        match entry {
            Some(entry) => list.push_live(entry, txn_id, commit_ts),
            None => list.push_dropped(txn_id, commit_ts),
        }
    }
}
