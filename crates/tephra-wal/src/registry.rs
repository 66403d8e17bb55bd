//! WAL file naming, enumeration, and recycling.
//!
//! The current file lives at a fixed path `<wal_dir>/wal.log` and is the
//! only file the writer appends to. Rotation renames it to
//! `wal.log.<max_commit_ts>` (decimal), after which it is immutable.

use std::path::{Path, PathBuf};

use tephra_error::Result;
use tephra_types::TxnTimestamp;
use tephra_vfs::Vfs;
use tracing::{debug, info};

/// Fixed name of the current WAL file.
pub const WAL_FILE_NAME: &str = "wal.log";

/// A rotated WAL file and the largest commit timestamp it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalFileInfo {
    pub path: PathBuf,
    pub max_commit_ts: TxnTimestamp,
}

/// Path of the current WAL file.
#[must_use]
pub fn current_wal_path(wal_dir: &Path) -> PathBuf {
    wal_dir.join(WAL_FILE_NAME)
}

/// Name of a rotated WAL file.
#[must_use]
pub fn rotated_wal_name(max_commit_ts: TxnTimestamp) -> String {
    format!("{WAL_FILE_NAME}.{max_commit_ts}")
}

/// Parse a directory entry name. Returns `Some(None)` for the current
/// file, `Some(Some(ts))` for a rotated file, `None` for anything else.
#[must_use]
pub fn parse_wal_filename(name: &str) -> Option<Option<TxnTimestamp>> {
    if name == WAL_FILE_NAME {
        return Some(None);
    }
    let ts = name
        .strip_prefix(WAL_FILE_NAME)?
        .strip_prefix('.')?
        .parse()
        .ok()?;
    Some(Some(ts))
}

/// Enumerate the WAL directory: the current file (if present) and every
/// rotated file, the latter sorted by `max_commit_ts` descending.
pub fn enumerate(
    vfs: &dyn Vfs,
    wal_dir: &Path,
) -> Result<(Option<PathBuf>, Vec<WalFileInfo>)> {
    let mut current = None;
    let mut rotated = Vec::new();
    for name in vfs.list_dir(wal_dir)? {
        match parse_wal_filename(&name) {
            Some(None) => current = Some(vfs.join(wal_dir, &name)),
            Some(Some(max_commit_ts)) => rotated.push(WalFileInfo {
                path: vfs.join(wal_dir, &name),
                max_commit_ts,
            }),
            None => debug!(file = %name, "ignoring non-WAL file in wal dir"),
        }
    }
    rotated.sort_by(|a, b| b.max_commit_ts.cmp(&a.max_commit_ts));
    Ok((current, rotated))
}

/// Delete rotated files whose contents are covered by a checkpoint at
/// `max_commit_ts`. The current file is never touched. Returns the number
/// of files removed.
pub fn recycle_wal_files(
    vfs: &dyn Vfs,
    wal_dir: &Path,
    max_commit_ts: TxnTimestamp,
) -> Result<u32> {
    let (_, rotated) = enumerate(vfs, wal_dir)?;
    let mut removed = 0;
    for info in rotated {
        if info.max_commit_ts <= max_commit_ts {
            info!(path = %info.path.display(), "recycling rotated WAL file");
            vfs.delete(&info.path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
