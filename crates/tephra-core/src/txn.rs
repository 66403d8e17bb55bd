//! Transactions and the transaction manager.
//!
//! Commit is two-phase. Commit-top stages the transaction's commands and
//! hands them to the WAL manager, which assigns the commit timestamp and
//! enqueues the entry. Commit-bottom runs on the WAL writer thread once
//! the entry is durable: it applies the commands to the catalog, making
//! them visible in WAL order, then wakes the committing session.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tephra_catalog::{BufferManager, Catalog};
use tephra_error::{Result, TephraError};
use tephra_index::IndexReader;
use tephra_types::{
    DataBlock, IndexDef, RowId, SegmentId, SegmentInfo, TableDef, TxnId, TxnTimestamp,
};
use tephra_wal::{apply::apply_command, CommitSink, WalCommand, WalManager};
use tracing::{debug, error, trace};

struct TxnState {
    cmds: Vec<WalCommand>,
    done: Mutex<Option<Result<TxnTimestamp>>>,
    cond: Condvar,
}

/// Manages transaction lifecycle and the commit pipeline.
pub struct TxnManager {
    catalog: Arc<Catalog>,
    buffer: Arc<BufferManager>,
    wal: Mutex<Option<Arc<WalManager>>>,
    pending: Mutex<HashMap<TxnId, Arc<TxnState>>>,
}

impl TxnManager {
    /// New manager over the shared catalog and buffer manager.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, buffer: Arc<BufferManager>) -> Self {
        Self {
            catalog,
            buffer,
            wal: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Wire in the WAL manager (it is constructed after this manager
    /// because it holds this manager as its commit sink).
    pub fn set_wal(&self, wal: Arc<WalManager>) {
        *self.wal.lock() = Some(wal);
    }

    /// Begin a transaction reading at the current committed timestamp.
    #[must_use]
    pub fn begin_txn(self: &Arc<Self>) -> Txn {
        let txn_id = self.catalog.allocate_txn_id();
        let begin_ts = self.catalog.current_ts();
        trace!(txn_id, begin_ts, "begin txn");
        Txn {
            manager: Arc::clone(self),
            txn_id,
            begin_ts,
            cmds: Vec::new(),
        }
    }

    /// Stop accepting commits. The WAL manager is stopped separately,
    /// after this, so queued entries still drain.
    pub fn stop(&self) {
        debug!("txn manager stopping");
        *self.wal.lock() = None;
    }

    /// The engine catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    fn commit(&self, txn: Txn) -> Result<TxnTimestamp> {
        if txn.cmds.is_empty() {
            // Read-only transactions never enter the WAL.
            return Ok(txn.begin_ts);
        }
        let wal = self
            .wal
            .lock()
            .clone()
            .ok_or(TephraError::WalStopped)?;
        let state = Arc::new(TxnState {
            cmds: txn.cmds,
            done: Mutex::new(None),
            cond: Condvar::new(),
        });
        self.pending.lock().insert(txn.txn_id, Arc::clone(&state));
        wal.submit_commit(txn.txn_id, state.cmds.clone())
            .inspect_err(|_| {
                self.pending.lock().remove(&txn.txn_id);
            })?;
        // Block until the writer reaches this entry in order.
        let mut done = state.done.lock();
        while done.is_none() {
            state.cond.wait(&mut done);
        }
        let result = done.take().unwrap_or_else(|| {
            Err(TephraError::internal("commit signalled without a result"))
        });
        drop(done);
        self.pending.lock().remove(&txn.txn_id);
        result
    }
}

impl CommitSink for TxnManager {
    fn commit_bottom(&self, txn_id: TxnId, commit_ts: TxnTimestamp) {
        let state = self.pending.lock().get(&txn_id).cloned();
        let Some(state) = state else {
            // Entries without a waiting session (checkpoints) need no
            // visibility signal.
            trace!(txn_id, commit_ts, "commit bottom for unregistered txn");
            return;
        };
        let mut outcome = Ok(commit_ts);
        for cmd in &state.cmds {
            if let Err(err) = apply_command(&self.catalog, &self.buffer, cmd, txn_id, commit_ts) {
                error!(
                    txn_id,
                    commit_ts,
                    cmd = cmd.type_name(),
                    error = %err,
                    "commit bottom failed to apply command"
                );
                outcome = Err(err);
                break;
            }
        }
        let mut done = state.done.lock();
        *done = Some(outcome);
        state.cond.notify_all();
    }
}

/// A transaction handle: a read snapshot plus staged write commands.
pub struct Txn {
    manager: Arc<TxnManager>,
    txn_id: TxnId,
    begin_ts: TxnTimestamp,
    cmds: Vec<WalCommand>,
}

impl Txn {
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    #[must_use]
    pub fn begin_ts(&self) -> TxnTimestamp {
        self.begin_ts
    }

    // -- Staged DDL / DML ---------------------------------------------------

    /// Stage a database creation.
    pub fn create_database(&mut self, db_name: &str) {
        self.cmds.push(WalCommand::CreateDatabase {
            db_name: db_name.to_owned(),
            db_dir_tail: db_name.to_owned(),
        });
    }

    /// Stage a database drop.
    pub fn drop_database(&mut self, db_name: &str) {
        self.cmds.push(WalCommand::DropDatabase {
            db_name: db_name.to_owned(),
        });
    }

    /// Stage a table creation.
    pub fn create_table(&mut self, db_name: &str, table_def: TableDef) {
        let table_dir_tail = table_def.table_name.clone();
        self.cmds.push(WalCommand::CreateTable {
            db_name: db_name.to_owned(),
            table_def,
            table_dir_tail,
        });
    }

    /// Stage a table drop.
    pub fn drop_table(&mut self, db_name: &str, table_name: &str) {
        self.cmds.push(WalCommand::DropTable {
            db_name: db_name.to_owned(),
            table_name: table_name.to_owned(),
        });
    }

    /// Stage an index creation.
    pub fn create_index(&mut self, db_name: &str, table_name: &str, index_def: IndexDef) {
        let index_dir_tail = index_def.index_name.clone();
        self.cmds.push(WalCommand::CreateIndex {
            db_name: db_name.to_owned(),
            table_name: table_name.to_owned(),
            index_def,
            index_dir_tail,
        });
    }

    /// Stage an index drop.
    pub fn drop_index(&mut self, db_name: &str, table_name: &str, index_name: &str) {
        self.cmds.push(WalCommand::DropIndex {
            db_name: db_name.to_owned(),
            table_name: table_name.to_owned(),
            index_name: index_name.to_owned(),
        });
    }

    /// Stage a row append.
    pub fn append(&mut self, db_name: &str, table_name: &str, block: DataBlock) {
        self.cmds.push(WalCommand::Append {
            db_name: db_name.to_owned(),
            table_name: table_name.to_owned(),
            block,
        });
    }

    /// Stage a row deletion.
    pub fn delete(&mut self, db_name: &str, table_name: &str, row_ids: Vec<RowId>) {
        self.cmds.push(WalCommand::Delete {
            db_name: db_name.to_owned(),
            table_name: table_name.to_owned(),
            row_ids,
        });
    }

    /// Stage a segment import.
    pub fn import(&mut self, db_name: &str, table_name: &str, segment_info: SegmentInfo) {
        self.cmds.push(WalCommand::Import {
            db_name: db_name.to_owned(),
            table_name: table_name.to_owned(),
            segment_info,
        });
    }

    /// Stage a compaction.
    pub fn compact(
        &mut self,
        db_name: &str,
        table_name: &str,
        new_segment_infos: Vec<SegmentInfo>,
        deprecated_segment_ids: Vec<SegmentId>,
    ) {
        self.cmds.push(WalCommand::Compact {
            db_name: db_name.to_owned(),
            table_name: table_name.to_owned(),
            new_segment_infos,
            deprecated_segment_ids,
        });
    }

    // -- Reads --------------------------------------------------------------

    /// Fulltext readers for a table, as of this transaction's snapshot.
    pub fn get_index_reader(&self, db_name: &str, table_name: &str) -> Result<IndexReader> {
        let table = self
            .manager
            .catalog
            .get_table(db_name, table_name, self.begin_ts)?;
        table.get_index_reader(self.manager.catalog.vfs().as_ref(), self.begin_ts)
    }

    /// Table row count visible to this snapshot.
    pub fn table_row_count(&self, db_name: &str, table_name: &str) -> Result<u64> {
        let table = self
            .manager
            .catalog
            .get_table(db_name, table_name, self.begin_ts)?;
        Ok(table.row_count())
    }

    /// Commit: durably log staged commands, then wait until they are
    /// visible. Read-only transactions return their begin timestamp.
    pub fn commit(self) -> Result<TxnTimestamp> {
        let manager = Arc::clone(&self.manager);
        manager.commit(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_commit_skips_the_wal() {
        let catalog = Arc::new(Catalog::new(
            Arc::new(tephra_vfs::MemoryVfs::new()),
            "data".into(),
            "catalog".into(),
        ));
        catalog.advance_ts(7);
        let manager = Arc::new(TxnManager::new(catalog, Arc::new(BufferManager::new())));
        // No WAL wired at all: a read-only commit must still succeed.
        let txn = manager.begin_txn();
        assert_eq!(txn.begin_ts(), 7);
        let ts = txn.commit().expect("read-only commit");
        assert_eq!(ts, 7);
    }

    #[test]
    fn write_commit_without_wal_is_rejected() {
        let catalog = Arc::new(Catalog::new(
            Arc::new(tephra_vfs::MemoryVfs::new()),
            "data".into(),
            "catalog".into(),
        ));
        let manager = Arc::new(TxnManager::new(catalog, Arc::new(BufferManager::new())));
        let mut txn = manager.begin_txn();
        txn.create_database("db0");
        let err = txn.commit().expect_err("no wal");
        assert!(matches!(err, TephraError::WalStopped));
    }
}
