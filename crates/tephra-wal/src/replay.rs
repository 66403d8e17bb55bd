//! Startup recovery by WAL replay.
//!
//! Runs once before the engine accepts traffic:
//!
//! 1. Enumerate `wal_dir`: the current file plus rotated files, newest
//!    first.
//! 2. Reverse-scan entries until a `Checkpoint` command is found,
//!    buffering the entries visited on the way (they committed after the
//!    checkpoint began).
//! 3. Keep reverse-scanning while `commit_ts > checkpoint_max_commit_ts`.
//! 4. Reload the checkpoint's catalog snapshot, then re-apply the buffer
//!    in chronological order through the per-command handlers.
//!
//! A frame failing validation is tolerated only as the torn tail of the
//! current file; a non-empty WAL with no reachable checkpoint is fatal.

use std::path::PathBuf;
use std::sync::Arc;

use tephra_catalog::{BufferManager, Catalog};
use tephra_error::{Result, TephraError};
use tephra_types::{StorageConfig, TxnTimestamp};
use tephra_vfs::Vfs;
use tracing::{debug, info, warn};

use crate::apply::apply_command;
use crate::entry::{decode_file, TailStatus, WalCommand, WalEntry};
use crate::registry;

/// What replay recovered.
pub struct ReplayOutcome {
    /// The reloaded (or freshly initialized) catalog.
    pub catalog: Arc<Catalog>,
    /// Commit timestamp of the last durable entry; 0 on a fresh start.
    pub system_start_ts: TxnTimestamp,
    /// The checkpoint replay recovered from: `(max_commit_ts, is_full)`.
    pub checkpoint: Option<(TxnTimestamp, bool)>,
    /// Entries re-applied after the checkpoint.
    pub replayed_entries: usize,
}

impl std::fmt::Debug for ReplayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayOutcome")
            .field("system_start_ts", &self.system_start_ts)
            .field("checkpoint", &self.checkpoint)
            .field("replayed_entries", &self.replayed_entries)
            .finish()
    }
}

/// Replay the WAL under `config` and return the recovered state.
pub fn replay(
    vfs: &Arc<dyn Vfs>,
    config: &StorageConfig,
    buffer: &BufferManager,
) -> Result<ReplayOutcome> {
    let (current, rotated) = registry::enumerate(vfs.as_ref(), &config.wal_dir)?;

    // Newest file first: the current file, then rotated descending.
    let mut files: Vec<(PathBuf, bool)> = Vec::new();
    if let Some(path) = current {
        files.push((path, true));
    }
    files.extend(rotated.into_iter().map(|info| (info.path, false)));

    if files.is_empty() {
        info!("no WAL files found, initializing a fresh catalog");
        let catalog = Arc::new(Catalog::new(
            Arc::clone(vfs),
            config.data_dir.clone(),
            config.catalog_dir.clone(),
        ));
        return Ok(ReplayOutcome {
            catalog,
            system_start_ts: 0,
            checkpoint: None,
            replayed_entries: 0,
        });
    }

    info!(files = files.len(), "WAL replay starting");

    // Phases 1 and 2: reverse scan for the checkpoint, buffering entries
    // newer than it.
    let mut replay_entries: Vec<WalEntry> = Vec::new();
    let mut checkpoint: Option<(TxnTimestamp, bool, String, TxnTimestamp)> = None;
    'files: for (path, is_current) in &files {
        let bytes = vfs.read_all(path)?;
        let (entries, tail) = decode_file(&bytes)?;
        match tail {
            TailStatus::Clean => {}
            TailStatus::Torn { detail } if *is_current => {
                warn!(path = %path.display(), detail = %detail, "discarding torn WAL tail");
            }
            TailStatus::Torn { detail } => {
                return Err(TephraError::wal_corrupt(format!(
                    "rotated file {}: {detail}",
                    path.display()
                )));
            }
        }
        for entry in entries.into_iter().rev() {
            let found_ckp_ts = checkpoint.as_ref().map(|(max_commit_ts, ..)| *max_commit_ts);
            if let Some(max_commit_ts) = found_ckp_ts {
                // Phase 2: collect entries past the checkpoint, stop at
                // the first one at or below it.
                if entry.commit_ts > max_commit_ts {
                    replay_entries.push(entry);
                } else {
                    break 'files;
                }
            } else if let Some((_, is_full, max_commit_ts, catalog_path)) =
                entry.checkpoint_cmd()
            {
                debug!(
                    max_commit_ts,
                    is_full,
                    catalog_path,
                    "found checkpoint during reverse scan"
                );
                checkpoint = Some((
                    max_commit_ts,
                    is_full,
                    catalog_path.to_owned(),
                    entry.commit_ts,
                ));
            } else {
                replay_entries.push(entry);
            }
        }
    }

    // A non-empty WAL always contains a reachable checkpoint; without one
    // the catalog cannot be reconstructed.
    let Some((ckp_max_commit_ts, is_full, _catalog_path, ckp_entry_ts)) = checkpoint else {
        return Err(TephraError::CheckpointNotFound);
    };

    // Phase 3: reload the catalog, then re-apply the tail chronologically.
    let catalog = Arc::new(Catalog::load(
        Arc::clone(vfs),
        config.data_dir.clone(),
        config.catalog_dir.clone(),
        ckp_max_commit_ts,
    )?);

    replay_entries.reverse();
    let mut system_start_ts = ckp_entry_ts;
    let mut last_txn_id = None;
    let mut replayed = 0usize;
    for entry in &replay_entries {
        if entry.commit_ts < ckp_max_commit_ts {
            return Err(TephraError::wal_corrupt(format!(
                "replay entry commit_ts {} below checkpoint max_commit_ts {ckp_max_commit_ts}",
                entry.commit_ts
            )));
        }
        if entry.commit_ts == ckp_max_commit_ts {
            // Already captured by the checkpoint.
            debug!(commit_ts = entry.commit_ts, "skipping entry at checkpoint boundary");
            continue;
        }
        for cmd in &entry.cmds {
            if matches!(cmd, WalCommand::Checkpoint { .. }) {
                continue;
            }
            apply_command(&catalog, buffer, cmd, entry.txn_id, entry.commit_ts)?;
        }
        system_start_ts = entry.commit_ts;
        last_txn_id = Some(entry.txn_id);
        replayed += 1;
    }

    if let Some(txn_id) = last_txn_id {
        catalog.set_next_txn_id(txn_id + 1);
    }
    catalog.advance_ts(system_start_ts);
    catalog.init_delta_entry(if is_full { ckp_max_commit_ts } else { catalog.delta_baseline_ts() });

    info!(
        system_start_ts,
        replayed,
        checkpoint_ts = ckp_max_commit_ts,
        "WAL replay finished"
    );
    Ok(ReplayOutcome {
        catalog,
        system_start_ts,
        checkpoint: Some((ckp_max_commit_ts, is_full)),
        replayed_entries: replayed,
    })
}

#[cfg(test)]
mod tests {
    use tephra_types::{ColumnDef, DataBlock, TableDef, Value, ValueType};
    use tephra_vfs::MemoryVfs;

    use super::*;
    use crate::entry::WalEntry;

    fn config() -> StorageConfig {
        StorageConfig::with_root("engine")
    }

    fn arc_vfs(vfs: &MemoryVfs) -> Arc<dyn Vfs> {
        Arc::new(vfs.clone())
    }

    fn table_def() -> TableDef {
        TableDef {
            table_name: "books".to_owned(),
            columns: vec![ColumnDef {
                id: 0,
                name: "body".to_owned(),
                value_type: ValueType::Varchar,
            }],
        }
    }

    fn append_cmd(text: &str) -> WalCommand {
        WalCommand::Append {
            db_name: "db0".to_owned(),
            table_name: "books".to_owned(),
            block: DataBlock::new(vec![vec![Value::Varchar(text.to_owned())]])
                .expect("rectangular"),
        }
    }

    fn entry(txn_id: u64, commit_ts: u64, cmds: Vec<WalCommand>) -> WalEntry {
        WalEntry {
            txn_id,
            commit_ts,
            cmds,
        }
    }

    /// Write a catalog snapshot + WAL file laying out: schema before the
    /// checkpoint, two appends after it.
    fn seed_engine(vfs: &Arc<dyn Vfs>) -> StorageConfig {
        let cfg = config();
        let buffer = BufferManager::new();
        let catalog = Catalog::new(
            Arc::clone(vfs),
            cfg.data_dir.clone(),
            cfg.catalog_dir.clone(),
        );
        let ddl = vec![
            entry(
                1,
                1,
                vec![WalCommand::CreateDatabase {
                    db_name: "db0".to_owned(),
                    db_dir_tail: "db0".to_owned(),
                }],
            ),
            entry(
                2,
                2,
                vec![WalCommand::CreateTable {
                    db_name: "db0".to_owned(),
                    table_def: table_def(),
                    table_dir_tail: "books".to_owned(),
                }],
            ),
        ];
        for e in &ddl {
            for cmd in &e.cmds {
                apply_command(&catalog, &buffer, cmd, e.txn_id, e.commit_ts).expect("apply");
            }
        }
        catalog.advance_ts(2);
        catalog.set_next_txn_id(3);
        let snapshot_path = catalog.save_full(2).expect("snapshot");

        let mut wal = Vec::new();
        for e in &ddl {
            wal.extend_from_slice(&e.encode_frame());
        }
        wal.extend_from_slice(
            &entry(
                3,
                3,
                vec![WalCommand::Checkpoint {
                    is_full: true,
                    max_commit_ts: 2,
                    catalog_path: snapshot_path.to_string_lossy().into_owned(),
                }],
            )
            .encode_frame(),
        );
        wal.extend_from_slice(&entry(4, 4, vec![append_cmd("hello wal")]).encode_frame());
        wal.extend_from_slice(&entry(5, 5, vec![append_cmd("hello again")]).encode_frame());
        vfs.write_all(&cfg.wal_dir.join("wal.log"), &wal).expect("wal");
        cfg
    }

    #[test]
    fn fresh_directory_starts_empty() {
        let vfs = arc_vfs(&MemoryVfs::new());
        let buffer = BufferManager::new();
        let outcome = replay(&vfs, &config(), &buffer).expect("replay");
        assert_eq!(outcome.system_start_ts, 0);
        assert!(outcome.checkpoint.is_none());
        assert_eq!(outcome.replayed_entries, 0);
    }

    #[test]
    fn replays_entries_after_checkpoint() {
        let vfs = arc_vfs(&MemoryVfs::new());
        let cfg = seed_engine(&vfs);
        let buffer = BufferManager::new();
        let outcome = replay(&vfs, &cfg, &buffer).expect("replay");

        assert_eq!(outcome.system_start_ts, 5);
        assert_eq!(outcome.checkpoint, Some((2, true)));
        assert_eq!(outcome.replayed_entries, 2);
        let table = outcome.catalog.get_table("db0", "books", 5).expect("table");
        assert_eq!(table.row_count(), 2);
        // next_txn_id follows the last replayed entry.
        assert_eq!(outcome.catalog.next_txn_id(), 6);
        // New commits keep timestamps strictly after the replayed history.
        assert!(outcome.catalog.allocate_ts() > 5);
    }

    #[test]
    fn torn_tail_in_current_file_is_discarded() {
        let vfs = arc_vfs(&MemoryVfs::new());
        let cfg = seed_engine(&vfs);
        let wal_path = cfg.wal_dir.join("wal.log");
        // Append a half-written frame, as a crash mid-write would.
        let mut bytes = vfs.read_all(&wal_path).expect("read");
        let torn = entry(6, 6, vec![append_cmd("never committed")]).encode_frame();
        bytes.extend_from_slice(&torn[..torn.len() - 5]);
        vfs.write_all(&wal_path, &bytes).expect("write");

        let buffer = BufferManager::new();
        let outcome = replay(&vfs, &cfg, &buffer).expect("replay");
        // The torn entry is gone; everything durable survived.
        assert_eq!(outcome.system_start_ts, 5);
        let table = outcome.catalog.get_table("db0", "books", 5).expect("table");
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn corruption_before_the_tail_is_fatal() {
        let vfs = arc_vfs(&MemoryVfs::new());
        let cfg = seed_engine(&vfs);
        let wal_path = cfg.wal_dir.join("wal.log");
        let mut bytes = vfs.read_all(&wal_path).expect("read");
        // Flip a payload byte in the middle of the file.
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        vfs.write_all(&wal_path, &bytes).expect("write");

        let buffer = BufferManager::new();
        let err = replay(&vfs, &cfg, &buffer).expect_err("corrupt");
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_checkpoint_in_nonempty_wal_is_fatal() {
        let vfs = arc_vfs(&MemoryVfs::new());
        let cfg = config();
        let mut wal = Vec::new();
        wal.extend_from_slice(
            &entry(
                1,
                1,
                vec![WalCommand::CreateDatabase {
                    db_name: "db0".to_owned(),
                    db_dir_tail: "db0".to_owned(),
                }],
            )
            .encode_frame(),
        );
        vfs.write_all(&cfg.wal_dir.join("wal.log"), &wal).expect("wal");

        let buffer = BufferManager::new();
        let err = replay(&vfs, &cfg, &buffer).expect_err("no checkpoint");
        assert!(matches!(err, TephraError::CheckpointNotFound));
        assert!(err.is_fatal());
    }

    #[test]
    fn scans_rotated_files_for_the_checkpoint() {
        let vfs = arc_vfs(&MemoryVfs::new());
        let cfg = seed_engine(&vfs);
        // Simulate a rotation that happened right after the last entry:
        // everything so far moves to wal.log.5, a fresh current file holds
        // one more append.
        let wal_path = cfg.wal_dir.join("wal.log");
        let old = vfs.read_all(&wal_path).expect("read");
        vfs.write_all(&cfg.wal_dir.join("wal.log.5"), &old).expect("rotated");
        let fresh = entry(6, 6, vec![append_cmd("post rotation")]).encode_frame();
        vfs.write_all(&wal_path, &fresh).expect("current");

        let buffer = BufferManager::new();
        let outcome = replay(&vfs, &cfg, &buffer).expect("replay");
        assert_eq!(outcome.system_start_ts, 6);
        assert_eq!(outcome.replayed_entries, 3);
        let table = outcome.catalog.get_table("db0", "books", 6).expect("table");
        assert_eq!(table.row_count(), 3);
    }

    #[test]
    fn reverse_and_forward_scan_agree_on_checkpoint() {
        let vfs = arc_vfs(&MemoryVfs::new());
        let cfg = seed_engine(&vfs);
        let bytes = vfs.read_all(&cfg.wal_dir.join("wal.log")).expect("read");
        let (entries, _) = decode_file(&bytes).expect("decode");

        let forward_last = entries
            .iter()
            .filter_map(WalEntry::checkpoint_cmd)
            .map(|(_, _, ts, _)| ts)
            .last();
        let reverse_first = entries
            .iter()
            .rev()
            .filter_map(WalEntry::checkpoint_cmd)
            .map(|(_, _, ts, _)| ts)
            .next();
        assert_eq!(forward_last, reverse_first);
        assert_eq!(forward_last, Some(2));
    }
}
