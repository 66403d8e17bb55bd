//! The WAL manager: group-commit writer thread and its control surface.
//!
//! `submit_commit` is the single entry point for committed work: it
//! allocates the commit timestamp and enqueues the entry under one lock,
//! so queue order equals commit-timestamp order. A dedicated writer
//! thread dequeues in bulk, appends checksummed frames, flushes per
//! policy, then invokes the commit sink for each entry in enqueue order so
//! visibility matches WAL order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tephra_catalog::Catalog;
use tephra_error::{Result, TephraError};
use tephra_types::{FlushOption, StorageConfig, TxnId, TxnTimestamp};
use tephra_vfs::{Vfs, VfsFile};
use tracing::{debug, error, info, trace, warn};

use crate::checkpoint::{CheckpointCoordinator, CheckpointKind};
use crate::entry::{WalCommand, WalEntry};
use crate::registry;

/// Commit-visibility hook invoked by the writer once an entry is durable.
///
/// Implemented by the transaction manager; unknown transaction ids (e.g.
/// checkpoint entries) must be ignored. Defined here rather than depending
/// on the transaction layer to keep the crate graph acyclic.
pub trait CommitSink: Send + Sync {
    /// Called in WAL order after the entry's batch reached stable storage.
    fn commit_bottom(&self, txn_id: TxnId, commit_ts: TxnTimestamp);
}

/// Executor for checkpoint tasks.
pub trait BackgroundExecutor: Send + Sync {
    /// Run `task` on a background worker.
    fn submit(&self, task: Box<dyn FnOnce() + Send>);
}

enum WriterMsg {
    Entry(WalEntry),
    Shutdown,
}

/// WAL manager state shared between producers, the writer thread, and
/// checkpoint tasks.
pub struct WalManager {
    config: StorageConfig,
    vfs: Arc<dyn Vfs>,
    catalog: Arc<Catalog>,
    committer: Arc<dyn CommitSink>,
    background: Arc<dyn BackgroundExecutor>,
    running: AtomicBool,
    sender: Mutex<Option<Sender<WriterMsg>>>,
    join: Mutex<Option<JoinHandle<()>>>,
    fatal: Mutex<Option<TephraError>>,
    commit_lock: Mutex<()>,
    max_commit_ts: AtomicU64,
    wal_size: AtomicU64,
    checkpoint: CheckpointCoordinator,
}

impl WalManager {
    /// Construct a stopped manager.
    #[must_use]
    pub fn new(
        vfs: Arc<dyn Vfs>,
        config: StorageConfig,
        catalog: Arc<Catalog>,
        committer: Arc<dyn CommitSink>,
        background: Arc<dyn BackgroundExecutor>,
    ) -> Self {
        Self {
            config,
            vfs,
            catalog,
            committer,
            background,
            running: AtomicBool::new(false),
            sender: Mutex::new(None),
            join: Mutex::new(None),
            fatal: Mutex::new(None),
            commit_lock: Mutex::new(()),
            max_commit_ts: AtomicU64::new(0),
            wal_size: AtomicU64::new(0),
            checkpoint: CheckpointCoordinator::new(),
        }
    }

    /// Seed post-replay state before starting the writer.
    pub fn seed(&self, max_commit_ts: TxnTimestamp, checkpoint: Option<(TxnTimestamp, bool)>) {
        self.max_commit_ts.store(max_commit_ts, Ordering::SeqCst);
        if let Some((ts, is_full)) = checkpoint {
            self.checkpoint.seed_after_replay(ts, is_full);
        }
    }

    /// Start the writer thread. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        info!(wal_dir = %self.config.wal_dir.display(), "WAL manager starting");
        self.vfs.create_dir_all(&self.config.wal_dir)?;
        let file = self
            .vfs
            .open_append(&registry::current_wal_path(&self.config.wal_dir))?;
        let (sender, receiver) = std::sync::mpsc::channel();
        *self.sender.lock() = Some(sender);
        let manager = Arc::clone(self);
        let join = std::thread::Builder::new()
            .name("tephra-wal-writer".to_owned())
            .spawn(move || writer_loop(&manager, &receiver, file))
            .map_err(TephraError::Io)?;
        *self.join.lock() = Some(join);
        info!("WAL manager started");
        Ok(())
    }

    /// Stop the writer: drain the queue, close the file, surface any
    /// fatal writer error. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("WAL manager already stopped");
            return Ok(());
        }
        info!("WAL manager stopping");
        if let Some(sender) = self.sender.lock().take() {
            // The writer may already have exited on a fatal error.
            let _ = sender.send(WriterMsg::Shutdown);
        }
        if let Some(join) = self.join.lock().take() {
            if join.join().is_err() {
                return Err(TephraError::internal("WAL writer thread panicked"));
            }
        }
        info!("WAL manager stopped");
        match self.fatal.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Hand an already-stamped entry to the writer queue and return
    /// immediately.
    pub fn put_entry(&self, entry: WalEntry) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(TephraError::WalStopped);
        }
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(TephraError::WalStopped);
        };
        sender
            .send(WriterMsg::Entry(entry))
            .map_err(|_| TephraError::WalStopped)
    }

    /// Allocate a commit timestamp and enqueue the commands as one entry.
    ///
    /// Allocation and enqueue happen under one lock, which is what makes
    /// persisted commit timestamps strictly monotonic.
    pub fn submit_commit(
        &self,
        txn_id: TxnId,
        cmds: Vec<WalCommand>,
    ) -> Result<TxnTimestamp> {
        if cmds.is_empty() {
            return Err(TephraError::EmptyWalEntry { txn_id });
        }
        let _guard = self.commit_lock.lock();
        let commit_ts = self.catalog.allocate_ts();
        self.put_entry(WalEntry {
            txn_id,
            commit_ts,
            cmds,
        })?;
        Ok(commit_ts)
    }

    /// Submit a checkpoint task; single-flight. Returns false when one is
    /// already running.
    pub fn try_checkpoint(self: &Arc<Self>, kind: CheckpointKind) -> bool {
        if !self.checkpoint.try_begin() {
            return false;
        }
        let max_commit_ts = self.max_commit_ts.load(Ordering::SeqCst);
        let wal_size = self.wal_size.load(Ordering::SeqCst);
        let manager = Arc::clone(self);
        self.background.submit(Box::new(move || {
            match manager.checkpoint(kind, max_commit_ts, wal_size) {
                Ok(_) => {}
                Err(err) if err.is_fatal() => {
                    error!(error = %err, "checkpoint failed fatally");
                    manager.record_fatal(err);
                }
                Err(err) => {
                    warn!(error = %err, "checkpoint failed, will retry on next trigger");
                }
            }
        }));
        true
    }

    /// Largest commit timestamp the writer has persisted.
    #[must_use]
    pub fn max_commit_ts(&self) -> TxnTimestamp {
        self.max_commit_ts.load(Ordering::SeqCst)
    }

    /// Total WAL bytes written since start (across rotations).
    #[must_use]
    pub fn wal_size(&self) -> u64 {
        self.wal_size.load(Ordering::SeqCst)
    }

    /// Checkpoint coordination state.
    #[must_use]
    pub fn checkpoint_coordinator(&self) -> &CheckpointCoordinator {
        &self.checkpoint
    }

    /// Storage configuration.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// The engine VFS.
    #[must_use]
    pub fn vfs(&self) -> &Arc<dyn Vfs> {
        &self.vfs
    }

    /// The engine catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    fn record_fatal(&self, err: TephraError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(err);
        }
    }
}

// ---------------------------------------------------------------------------
// Writer thread
// ---------------------------------------------------------------------------

fn writer_loop(
    manager: &Arc<WalManager>,
    receiver: &Receiver<WriterMsg>,
    mut file: Box<dyn VfsFile>,
) {
    trace!("WAL writer mainloop begin");
    let mut last_sync = Instant::now();
    let mut shutdown = false;
    while !shutdown {
        let first = match receiver.recv() {
            Ok(msg) => msg,
            Err(_) => break,
        };
        let mut batch = Vec::new();
        match first {
            WriterMsg::Entry(entry) => batch.push(entry),
            WriterMsg::Shutdown => shutdown = true,
        }
        loop {
            match receiver.try_recv() {
                Ok(WriterMsg::Entry(entry)) => batch.push(entry),
                Ok(WriterMsg::Shutdown) => shutdown = true,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if batch.is_empty() {
            continue;
        }
        if let Err(err) = write_batch(manager, &mut file, &batch, &mut last_sync) {
            error!(error = %err, "WAL writer cannot guarantee durability");
            manager.record_fatal(err);
            break;
        }
        // Commit sequentially so transactions become visible in WAL order.
        for entry in &batch {
            manager.committer.commit_bottom(entry.txn_id, entry.commit_ts);
        }
        match maybe_rotate(manager, &mut file) {
            Ok(()) => {}
            Err(err) if err.is_fatal() => {
                error!(error = %err, "WAL rotation left no writable current file");
                manager.record_fatal(err);
                break;
            }
            Err(err) => {
                // The current file is intact; retried on the next batch.
                warn!(error = %err, "WAL rotation failed");
            }
        }
        let since_ckp = manager
            .wal_size()
            .saturating_sub(manager.checkpoint.last_ckp_wal_size());
        if since_ckp > manager.config.delta_checkpoint_interval_wal_bytes
            && !manager.try_checkpoint(CheckpointKind::Delta)
        {
            trace!("delta checkpoint skipped, another checkpoint is running");
        }
        trace!(batch = batch.len(), "WAL flush finished");
    }
    trace!("WAL writer mainloop end");
}

fn write_batch(
    manager: &Arc<WalManager>,
    file: &mut Box<dyn VfsFile>,
    batch: &[WalEntry],
    last_sync: &mut Instant,
) -> Result<()> {
    for entry in batch {
        if entry.cmds.is_empty() {
            // Read-only transactions must never reach the WAL.
            return Err(TephraError::EmptyWalEntry {
                txn_id: entry.txn_id,
            });
        }
        let expected = entry.frame_len();
        let frame = entry.encode_frame();
        if frame.len() != expected {
            return Err(TephraError::WalSizeMismatch {
                expected,
                actual: frame.len(),
            });
        }
        file.append(&frame)?;
        manager
            .max_commit_ts
            .store(entry.commit_ts, Ordering::SeqCst);
        manager.wal_size.fetch_add(frame.len() as u64, Ordering::SeqCst);
        trace!(
            txn_id = entry.txn_id,
            commit_ts = entry.commit_ts,
            bytes = frame.len(),
            "wrote WAL entry"
        );
    }
    match manager.config.flush_option {
        FlushOption::FlushAtOnce => {
            file.sync()?;
            *last_sync = Instant::now();
        }
        FlushOption::OnlyWrite => {}
        FlushOption::FlushPerSecond => {
            if last_sync.elapsed() >= Duration::from_secs(1) {
                file.sync()?;
                *last_sync = Instant::now();
            }
        }
    }
    Ok(())
}

fn maybe_rotate(manager: &Arc<WalManager>, file: &mut Box<dyn VfsFile>) -> Result<()> {
    if file.size()? <= manager.config.wal_size_threshold {
        return Ok(());
    }
    let wal_dir = &manager.config.wal_dir;
    let current = registry::current_wal_path(wal_dir);
    let rotated = manager.vfs.join(
        wal_dir,
        &registry::rotated_wal_name(manager.max_commit_ts()),
    );
    info!(from = %current.display(), to = %rotated.display(), "rotating WAL file");
    // A failed rename keeps the old handle valid and is retried later; a
    // failed reopen after the rename leaves no writable current file.
    manager
        .vfs
        .rename(&current, &rotated)
        .map_err(|err| TephraError::RotationFailed {
            detail: err.to_string(),
        })?;
    *file = manager.vfs.open_append(&current)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex as PlMutex;
    use tephra_vfs::MemoryVfs;

    use super::*;

    /// Records commit-bottom invocations in order.
    #[derive(Default)]
    struct RecordingSink {
        order: PlMutex<Vec<TxnId>>,
    }

    impl CommitSink for RecordingSink {
        fn commit_bottom(&self, txn_id: TxnId, _commit_ts: TxnTimestamp) {
            self.order.lock().push(txn_id);
        }
    }

    /// Runs checkpoint tasks inline on the submitting thread.
    struct InlineExecutor;

    impl BackgroundExecutor for InlineExecutor {
        fn submit(&self, task: Box<dyn FnOnce() + Send>) {
            task();
        }
    }

    /// Drops checkpoint tasks; the trigger outcome is all that matters.
    struct NullExecutor;

    impl BackgroundExecutor for NullExecutor {
        fn submit(&self, _task: Box<dyn FnOnce() + Send>) {}
    }

    fn config(root: &str) -> StorageConfig {
        StorageConfig::with_root(root)
    }

    fn manager_with(
        vfs: &MemoryVfs,
        cfg: StorageConfig,
        sink: Arc<dyn CommitSink>,
        background: Arc<dyn BackgroundExecutor>,
    ) -> (Arc<WalManager>, Arc<Catalog>) {
        let vfs: Arc<dyn Vfs> = Arc::new(vfs.clone());
        let catalog = Arc::new(Catalog::new(
            Arc::clone(&vfs),
            cfg.data_dir.clone(),
            cfg.catalog_dir.clone(),
        ));
        let manager = Arc::new(WalManager::new(
            vfs,
            cfg,
            Arc::clone(&catalog),
            sink,
            background,
        ));
        (manager, catalog)
    }

    fn drop_db_cmd(name: &str) -> Vec<WalCommand> {
        vec![WalCommand::DropDatabase {
            db_name: name.to_owned(),
        }]
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn group_commit_preserves_order_and_size() {
        let vfs = MemoryVfs::new();
        let sink = Arc::new(RecordingSink::default());
        let sink_dyn: Arc<dyn CommitSink> = Arc::clone(&sink) as Arc<dyn CommitSink>;
        let (manager, _catalog) =
            manager_with(&vfs, config("t1"), sink_dyn, Arc::new(NullExecutor));
        manager.start().expect("start");

        let mut expected_bytes = 0u64;
        let mut last_ts = 0;
        for txn_id in [101u64, 102, 103] {
            let ts = manager
                .submit_commit(txn_id, drop_db_cmd(&format!("db{txn_id}")))
                .expect("submit");
            assert!(ts > last_ts, "commit timestamps must increase");
            last_ts = ts;
            expected_bytes += WalEntry {
                txn_id,
                commit_ts: ts,
                cmds: drop_db_cmd(&format!("db{txn_id}")),
            }
            .frame_len() as u64;
        }
        wait_for(|| sink.order.lock().len() == 3);
        assert_eq!(*sink.order.lock(), vec![101, 102, 103]);
        assert_eq!(manager.wal_size(), expected_bytes);
        assert_eq!(
            vfs.file_size(&config("t1").wal_dir.join("wal.log"))
                .expect("size"),
            expected_bytes
        );
        manager.stop().expect("stop");
    }

    #[test]
    fn stop_is_idempotent_and_rejects_later_entries() {
        let vfs = MemoryVfs::new();
        let (manager, _catalog) = manager_with(
            &vfs,
            config("t2"),
            Arc::new(RecordingSink::default()),
            Arc::new(NullExecutor),
        );
        manager.start().expect("start");
        manager.stop().expect("stop");
        manager.stop().expect("stop twice");
        let err = manager
            .submit_commit(1, drop_db_cmd("db"))
            .expect_err("stopped");
        assert!(matches!(err, TephraError::WalStopped));
    }

    #[test]
    fn empty_entry_is_rejected_at_submit() {
        let vfs = MemoryVfs::new();
        let (manager, _catalog) = manager_with(
            &vfs,
            config("t3"),
            Arc::new(RecordingSink::default()),
            Arc::new(NullExecutor),
        );
        manager.start().expect("start");
        let err = manager.submit_commit(9, Vec::new()).expect_err("empty");
        assert!(matches!(err, TephraError::EmptyWalEntry { txn_id: 9 }));
        manager.stop().expect("stop");
    }

    #[test]
    fn rotation_renames_current_file_at_threshold() {
        let vfs = MemoryVfs::new();
        let mut cfg = config("t4");
        cfg.wal_size_threshold = 256;
        let wal_dir = cfg.wal_dir.clone();
        let sink = Arc::new(RecordingSink::default());
        let sink_dyn: Arc<dyn CommitSink> = Arc::clone(&sink) as Arc<dyn CommitSink>;
        let (manager, _catalog) = manager_with(&vfs, cfg, sink_dyn, Arc::new(NullExecutor));
        manager.start().expect("start");

        // Push enough entries to exceed the threshold.
        for txn_id in 0..16u64 {
            manager
                .submit_commit(txn_id, drop_db_cmd("some_database_name"))
                .expect("submit");
        }
        wait_for(|| sink.order.lock().len() == 16);
        manager.stop().expect("stop");

        let names = vfs.list_dir(&wal_dir).expect("list");
        assert!(names.contains(&"wal.log".to_owned()));
        let rotated: Vec<&String> = names.iter().filter(|n| *n != "wal.log").collect();
        assert!(!rotated.is_empty(), "expected a rotated file, got {names:?}");
        // The rotated file carries the bytes; wal.log is the fresh tail.
        let rotated_size = vfs
            .file_size(&wal_dir.join(rotated[0]))
            .expect("rotated size");
        assert!(rotated_size > 256);
    }

    #[test]
    fn delta_trigger_is_single_flight() {
        let vfs = MemoryVfs::new();
        let mut cfg = config("t5");
        cfg.delta_checkpoint_interval_wal_bytes = 64;
        let (manager, _catalog) = manager_with(
            &vfs,
            cfg,
            Arc::new(RecordingSink::default()),
            Arc::new(NullExecutor),
        );
        manager.start().expect("start");

        // NullExecutor never runs the task, so the flag stays claimed.
        assert!(manager.try_checkpoint(CheckpointKind::Delta));
        assert!(!manager.try_checkpoint(CheckpointKind::Delta));
        assert!(manager.checkpoint_coordinator().is_in_progress());
        manager.stop().expect("stop");
    }

    #[test]
    fn full_checkpoint_writes_snapshot_entry_and_recycles() {
        let vfs = MemoryVfs::new();
        let cfg = config("t6");
        let wal_dir = cfg.wal_dir.clone();
        let sink = Arc::new(RecordingSink::default());
        let sink_dyn: Arc<dyn CommitSink> = Arc::clone(&sink) as Arc<dyn CommitSink>;
        let (manager, catalog) = manager_with(&vfs, cfg.clone(), sink_dyn, Arc::new(InlineExecutor));
        manager.start().expect("start");

        catalog
            .create_database_replay("db0", "db0", 1, catalog.allocate_ts())
            .expect("db");
        manager.submit_commit(1, drop_db_cmd("scratch")).expect("submit");
        wait_for(|| sink.order.lock().len() == 1);

        let max_before_checkpoint = manager.max_commit_ts();
        assert!(manager.try_checkpoint(CheckpointKind::Full));
        wait_for(|| manager.checkpoint_coordinator().last_full_ckp_ts().is_some());
        let ckp_ts = manager
            .checkpoint_coordinator()
            .last_full_ckp_ts()
            .expect("checkpointed");
        assert_eq!(ckp_ts, max_before_checkpoint);

        // The checkpoint entry itself lands in the WAL.
        manager.stop().expect("stop");
        let bytes = vfs.read_all(&wal_dir.join("wal.log")).expect("read wal");
        let (entries, _) = crate::entry::decode_file(&bytes).expect("decode");
        let found = entries
            .iter()
            .filter_map(WalEntry::checkpoint_cmd)
            .any(|(_, is_full, ts, _)| is_full && ts == ckp_ts);
        assert!(found, "checkpoint command not found in WAL");
        // Catalog snapshot exists.
        let snaps = vfs.list_dir(&cfg.catalog_dir).expect("list catalog");
        assert!(snaps
            .iter()
            .any(|n| n == &format!("full.catalog.{ckp_ts}.json")));
    }

    #[test]
    fn checkpoint_skip_conditions() {
        let vfs = MemoryVfs::new();
        let (manager, _catalog) = manager_with(
            &vfs,
            config("t7"),
            Arc::new(RecordingSink::default()),
            Arc::new(InlineExecutor),
        );
        manager.start().expect("start");
        manager.checkpoint_coordinator().seed_after_replay(50, true);

        // Same ts as last checkpoint: noop.
        assert!(manager.checkpoint.try_begin());
        assert!(!manager
            .checkpoint(CheckpointKind::Delta, 50, 0)
            .expect("skip"));
        assert!(manager.checkpoint.try_begin());
        assert!(!manager
            .checkpoint(CheckpointKind::Full, 50, 0)
            .expect("skip"));

        // Timestamps going backwards: fatal.
        assert!(manager.checkpoint.try_begin());
        let err = manager
            .checkpoint(CheckpointKind::Delta, 40, 0)
            .expect_err("regression");
        assert!(matches!(err, TephraError::TimestampRegression { .. }));
        assert!(err.is_fatal());
        manager.stop().expect("stop");
    }
}
