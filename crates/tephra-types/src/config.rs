//! Storage configuration surface.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// When the WAL writer forces bytes to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushOption {
    /// Flush and fsync after every batch.
    #[default]
    FlushAtOnce,
    /// Write to the OS page cache only; never fsync.
    OnlyWrite,
    /// Fsync at most once per second, piggybacked on the writer loop.
    FlushPerSecond,
}

/// Recognized storage options.
///
/// Loading (files, env, CLI) happens outside the core; the core consumes
/// the resolved struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `wal.log` and rotated WAL files.
    pub wal_dir: PathBuf,
    /// Directory holding table/segment data.
    pub data_dir: PathBuf,
    /// Directory holding catalog snapshot files.
    pub catalog_dir: PathBuf,
    /// Current-file size that triggers rotation, in bytes.
    pub wal_size_threshold: u64,
    /// Accumulated WAL bytes since the last checkpoint that trigger a
    /// delta checkpoint.
    pub delta_checkpoint_interval_wal_bytes: u64,
    /// Durability policy for the writer.
    pub flush_option: FlushOption,
}

impl StorageConfig {
    /// Config rooted at `root`, with defaults for every tunable.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            wal_dir: root.join("wal"),
            data_dir: root.join("data"),
            catalog_dir: root.join("catalog"),
            wal_size_threshold: 1024 * 1024 * 1024,
            delta_checkpoint_interval_wal_bytes: 64 * 1024 * 1024,
            flush_option: FlushOption::FlushAtOnce,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::with_root("tephra_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_root_lays_out_subdirs() {
        let cfg = StorageConfig::with_root("/tmp/t");
        assert_eq!(cfg.wal_dir, PathBuf::from("/tmp/t/wal"));
        assert_eq!(cfg.catalog_dir, PathBuf::from("/tmp/t/catalog"));
        assert_eq!(cfg.flush_option, FlushOption::FlushAtOnce);
    }

    #[test]
    fn flush_option_serde_names() {
        let json = serde_json::to_string(&FlushOption::FlushPerSecond).expect("serialize");
        assert_eq!(json, "\"flush_per_second\"");
    }
}
