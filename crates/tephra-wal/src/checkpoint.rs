//! Checkpoint coordination.
//!
//! At most one checkpoint task runs at a time (single-flight atomic
//! flag). A task captures `(max_commit_ts, wal_size)` at submission,
//! persists the catalog snapshot, appends a `Checkpoint` command to the
//! WAL, and recycles files the snapshot made obsolete.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tephra_catalog::snapshot;
use tephra_error::{Result, TephraError};
use tephra_types::{TxnTimestamp, UNCOMMIT_TS};
use tracing::{debug, info};

use crate::entry::WalCommand;
use crate::manager::WalManager;
use crate::registry;

/// Checkpoint flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Persist the entire catalog.
    Full,
    /// Persist only changes since the last full checkpoint.
    Delta,
}

/// Single-flight checkpoint state.
///
/// `UNCOMMIT_TS` stands for "never checkpointed" in the timestamp slots.
pub struct CheckpointCoordinator {
    in_progress: AtomicBool,
    last_ckp_ts: AtomicU64,
    last_full_ckp_ts: AtomicU64,
    last_ckp_wal_size: AtomicU64,
}

impl Default for CheckpointCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointCoordinator {
    /// Fresh coordinator: nothing checkpointed yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            last_ckp_ts: AtomicU64::new(UNCOMMIT_TS),
            last_full_ckp_ts: AtomicU64::new(UNCOMMIT_TS),
            last_ckp_wal_size: AtomicU64::new(0),
        }
    }

    /// Claim the single-flight slot. Returns false when a checkpoint is
    /// already running.
    pub fn try_begin(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release the single-flight slot.
    pub fn end(&self) {
        self.in_progress.store(false, Ordering::SeqCst);
    }

    /// Whether a checkpoint is currently running.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Timestamp of the last completed checkpoint of any kind.
    #[must_use]
    pub fn last_ckp_ts(&self) -> Option<TxnTimestamp> {
        match self.last_ckp_ts.load(Ordering::SeqCst) {
            UNCOMMIT_TS => None,
            ts => Some(ts),
        }
    }

    /// Timestamp of the last completed full checkpoint.
    #[must_use]
    pub fn last_full_ckp_ts(&self) -> Option<TxnTimestamp> {
        match self.last_full_ckp_ts.load(Ordering::SeqCst) {
            UNCOMMIT_TS => None,
            ts => Some(ts),
        }
    }

    pub(crate) fn set_last_ckp_ts(&self, ts: TxnTimestamp) {
        self.last_ckp_ts.store(ts, Ordering::SeqCst);
    }

    pub(crate) fn set_last_full_ckp_ts(&self, ts: TxnTimestamp) {
        self.last_full_ckp_ts.store(ts, Ordering::SeqCst);
    }

    /// Total WAL bytes at the moment of the last checkpoint.
    #[must_use]
    pub fn last_ckp_wal_size(&self) -> u64 {
        self.last_ckp_wal_size.load(Ordering::SeqCst)
    }

    /// Record the WAL size snapshot of a completed checkpoint.
    pub fn set_last_ckp_wal_size(&self, wal_size: u64) {
        self.last_ckp_wal_size.store(wal_size, Ordering::SeqCst);
    }

    /// Seed state from replay: the checkpoint found in the WAL becomes the
    /// last known one.
    pub fn seed_after_replay(&self, ts: TxnTimestamp, is_full: bool) {
        self.set_last_ckp_ts(ts);
        if is_full {
            self.set_last_full_ckp_ts(ts);
        }
    }
}

/// Clears the in-progress flag on scope exit, success or failure, so a
/// later trigger may retry.
struct SingleFlightGuard<'a>(&'a CheckpointCoordinator);

impl Drop for SingleFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

impl WalManager {
    /// Execute a checkpoint against a captured `(max_commit_ts,
    /// wal_size)` pair. The caller must hold the single-flight slot.
    ///
    /// Returns `Ok(false)` for the skip conditions (nothing new to
    /// checkpoint). Recoverable persistence failures surface as
    /// [`TephraError::CheckpointFailed`]; timestamp regressions are fatal.
    pub fn checkpoint(
        &self,
        kind: CheckpointKind,
        max_commit_ts: TxnTimestamp,
        wal_size: u64,
    ) -> Result<bool> {
        let coordinator = self.checkpoint_coordinator();
        let _guard = SingleFlightGuard(coordinator);

        let last_ckp = coordinator.last_ckp_ts();
        let last_full = coordinator.last_full_ckp_ts();
        match kind {
            CheckpointKind::Full => {
                if last_full == Some(max_commit_ts) {
                    debug!(max_commit_ts, "skip full checkpoint, nothing new");
                    return Ok(false);
                }
            }
            CheckpointKind::Delta => {
                if last_ckp == Some(max_commit_ts) {
                    debug!(max_commit_ts, "skip delta checkpoint, nothing new");
                    return Ok(false);
                }
            }
        }
        if let Some(last) = last_ckp {
            if max_commit_ts < last {
                return Err(TephraError::TimestampRegression {
                    what: "checkpoint",
                    last,
                    new: max_commit_ts,
                });
            }
        }
        if let Some(last) = last_full {
            if max_commit_ts < last {
                return Err(TephraError::TimestampRegression {
                    what: "full checkpoint",
                    last,
                    new: max_commit_ts,
                });
            }
        }

        info!(
            kind = ?kind,
            max_commit_ts,
            wal_size,
            "checkpoint starting"
        );
        let catalog = self.catalog();
        let catalog_path = match kind {
            CheckpointKind::Full => catalog.save_full(max_commit_ts),
            CheckpointKind::Delta => catalog.save_delta(max_commit_ts),
        }
        .map_err(|err| {
            if err.is_fatal() {
                err
            } else {
                TephraError::checkpoint_failed(format!("catalog snapshot: {err}"))
            }
        })?;

        let txn_id = catalog.allocate_txn_id();
        self.submit_commit(
            txn_id,
            vec![WalCommand::Checkpoint {
                is_full: kind == CheckpointKind::Full,
                max_commit_ts,
                catalog_path: catalog_path.to_string_lossy().into_owned(),
            }],
        )?;

        coordinator.set_last_ckp_ts(max_commit_ts);
        coordinator.set_last_ckp_wal_size(wal_size);
        registry::recycle_wal_files(self.vfs().as_ref(), &self.config().wal_dir, max_commit_ts)
            .map_err(|err| {
                TephraError::checkpoint_failed(format!("recycling WAL files: {err}"))
            })?;
        if kind == CheckpointKind::Full {
            coordinator.set_last_full_ckp_ts(max_commit_ts);
            snapshot::recycle_snapshot_files(
                self.vfs().as_ref(),
                catalog.catalog_dir(),
                max_commit_ts,
            )
            .map_err(|err| {
                TephraError::checkpoint_failed(format!("recycling catalog files: {err}"))
            })?;
        }
        info!(kind = ?kind, max_commit_ts, "checkpoint done");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_flight_claim_and_release() {
        let coordinator = CheckpointCoordinator::new();
        assert!(coordinator.try_begin());
        assert!(!coordinator.try_begin());
        coordinator.end();
        assert!(coordinator.try_begin());
    }

    #[test]
    fn fresh_coordinator_has_no_checkpoints() {
        let coordinator = CheckpointCoordinator::new();
        assert_eq!(coordinator.last_ckp_ts(), None);
        assert_eq!(coordinator.last_full_ckp_ts(), None);
        assert_eq!(coordinator.last_ckp_wal_size(), 0);
    }

    #[test]
    fn seed_after_replay_sets_full_only_when_full() {
        let coordinator = CheckpointCoordinator::new();
        coordinator.seed_after_replay(50, false);
        assert_eq!(coordinator.last_ckp_ts(), Some(50));
        assert_eq!(coordinator.last_full_ckp_ts(), None);
        coordinator.seed_after_replay(60, true);
        assert_eq!(coordinator.last_full_ckp_ts(), Some(60));
    }
}
