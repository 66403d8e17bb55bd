//! Storage lifecycle: replay, start, serve, stop.

use std::sync::Arc;

use tephra_catalog::{BufferManager, Catalog};
use tephra_error::Result;
use tephra_types::{StorageConfig, TxnTimestamp};
use tephra_vfs::Vfs;
use tephra_wal::{replay, CheckpointKind, WalManager};
use tracing::info;

use crate::background::BackgroundProcessor;
use crate::txn::{Txn, TxnManager};

/// The assembled engine.
///
/// `open` replays the WAL before anything can run, wires the transaction
/// manager into the WAL writer, and on a fresh directory persists an
/// initial full checkpoint so a non-empty WAL always has a reachable
/// `Checkpoint` command.
pub struct Storage {
    catalog: Arc<Catalog>,
    buffer: Arc<BufferManager>,
    txn_manager: Arc<TxnManager>,
    background: Arc<BackgroundProcessor>,
    wal: Arc<WalManager>,
    system_start_ts: TxnTimestamp,
}

impl Storage {
    /// Recover state from `config`'s directories and start serving.
    pub fn open(vfs: Arc<dyn Vfs>, config: StorageConfig) -> Result<Self> {
        info!(wal_dir = %config.wal_dir.display(), "storage opening");
        let buffer = Arc::new(BufferManager::new());
        let outcome = replay(&vfs, &config, &buffer)?;
        let catalog = Arc::clone(&outcome.catalog);

        let background = Arc::new(BackgroundProcessor::new());
        background.start()?;

        let txn_manager = Arc::new(TxnManager::new(Arc::clone(&catalog), Arc::clone(&buffer)));
        let committer: Arc<dyn tephra_wal::CommitSink> = Arc::clone(&txn_manager) as Arc<dyn tephra_wal::CommitSink>;
        let executor: Arc<dyn tephra_wal::BackgroundExecutor> =
            Arc::clone(&background) as Arc<dyn tephra_wal::BackgroundExecutor>;
        let wal = Arc::new(WalManager::new(
            Arc::clone(&vfs),
            config,
            Arc::clone(&catalog),
            committer,
            executor,
        ));
        wal.seed(outcome.system_start_ts, outcome.checkpoint);
        txn_manager.set_wal(Arc::clone(&wal));
        wal.start()?;

        let storage = Self {
            catalog,
            buffer,
            txn_manager,
            background,
            wal,
            system_start_ts: outcome.system_start_ts,
        };
        if outcome.checkpoint.is_none() {
            // Fresh directory: seed the WAL with a full checkpoint so
            // recovery always finds one.
            storage.force_checkpoint(CheckpointKind::Full)?;
        }
        info!(
            system_start_ts = storage.system_start_ts,
            "storage open, accepting traffic"
        );
        Ok(storage)
    }

    /// Stop in dependency order: no new commits, drain the WAL, stop
    /// background work.
    pub fn stop(&self) -> Result<()> {
        info!("storage stopping");
        self.txn_manager.stop();
        self.wal.stop()?;
        self.background.stop()?;
        info!("storage stopped");
        Ok(())
    }

    /// Begin a transaction.
    #[must_use]
    pub fn begin_txn(&self) -> Txn {
        self.txn_manager.begin_txn()
    }

    /// Run a checkpoint synchronously on the calling thread, waiting for
    /// the single-flight slot if a background checkpoint is running.
    pub fn force_checkpoint(&self, kind: CheckpointKind) -> Result<bool> {
        let coordinator = self.wal.checkpoint_coordinator();
        while !coordinator.try_begin() {
            std::thread::yield_now();
        }
        self.wal
            .checkpoint(kind, self.wal.max_commit_ts(), self.wal.wal_size())
    }

    /// Commit timestamp recovered at startup.
    #[must_use]
    pub fn system_start_ts(&self) -> TxnTimestamp {
        self.system_start_ts
    }

    /// The engine catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The buffer manager handle.
    #[must_use]
    pub fn buffer(&self) -> &Arc<BufferManager> {
        &self.buffer
    }

    /// The WAL manager.
    #[must_use]
    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }
}
