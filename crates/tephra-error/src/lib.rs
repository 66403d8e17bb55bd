use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for Tephra operations.
///
/// Variants are grouped by subsystem. Every variant carries a fixed
/// [`Severity`]: `Fatal` means the durability contract or an internal
/// invariant is broken and the process must not keep accepting traffic;
/// `Recoverable` means the caller may retry or degrade; `UserFacing` means
/// the request itself was malformed and should be reported to the client by
/// an outer layer.
#[derive(Error, Debug)]
pub enum TephraError {
    // === I/O ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Short read (fewer bytes than expected).
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// File not found.
    #[error("file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    // === WAL ===
    /// WAL frame or file content failed validation.
    #[error("WAL is corrupt: {detail}")]
    WalCorrupt { detail: String },

    /// A non-empty WAL contains no reachable checkpoint command.
    #[error("no checkpoint found in non-empty WAL")]
    CheckpointNotFound,

    /// Encoded entry size differs from the codec's pre-computed size.
    #[error("WAL entry size mismatch: estimated {expected}, wrote {actual}")]
    WalSizeMismatch { expected: usize, actual: usize },

    /// A WAL entry with no commands reached the writer.
    #[error("WAL entry of txn {txn_id} has no commands")]
    EmptyWalEntry { txn_id: u64 },

    /// A timestamp moved backwards where monotonicity is required.
    #[error("{what}: timestamp went backwards ({last} -> {new})")]
    TimestampRegression { what: &'static str, last: u64, new: u64 },

    /// The WAL writer has already stopped.
    #[error("WAL writer is not running")]
    WalStopped,

    /// Rotating the current WAL file failed; retried on the next batch.
    #[error("WAL rotation failed: {detail}")]
    RotationFailed { detail: String },

    // === Checkpoint ===
    /// Checkpoint persistence failed.
    #[error("checkpoint failed: {detail}")]
    CheckpointFailed { detail: String },

    /// Catalog file referenced by a checkpoint is absent or unparseable.
    #[error("catalog snapshot is unusable: {detail}")]
    CatalogCorrupt { detail: String },

    // === Catalog ===
    /// No such database.
    #[error("no such database: {name}")]
    NoSuchDatabase { name: String },

    /// No such table.
    #[error("no such table: {name}")]
    NoSuchTable { name: String },

    /// No such index.
    #[error("no such index: {name}")]
    NoSuchIndex { name: String },

    /// No such column.
    #[error("no such column: {name}")]
    NoSuchColumn { name: String },

    /// Database already exists.
    #[error("database {name} already exists")]
    DatabaseExists { name: String },

    /// Table already exists.
    #[error("table {name} already exists")]
    TableExists { name: String },

    /// Index already exists.
    #[error("index {name} already exists")]
    IndexExists { name: String },

    /// No such segment.
    #[error("no such segment: {segment_id}")]
    NoSuchSegment { segment_id: u32 },

    // === Index ===
    /// A reader was consulted for a column with no indexed documents.
    #[error("fulltext column has no documents")]
    EmptyColumnLength,

    /// Inverted index segment file failed validation.
    #[error("index segment is corrupt: {detail}")]
    IndexCorrupt { detail: String },

    // === General ===
    /// Operation is not supported by this build or configuration.
    #[error("not supported: {0}")]
    Unsupported(String),

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// How the engine must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Invariant violation, corrupt state, or unrecoverable I/O. Log at
    /// error level and stop accepting traffic.
    Fatal,
    /// Transient failure; the caller may retry.
    Recoverable,
    /// Malformed request; converted to a client error at the boundary.
    UserFacing,
}

impl TephraError {
    /// Classify this error per the engine's failure taxonomy.
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Io(_)
            | Self::ShortRead { .. }
            | Self::WalCorrupt { .. }
            | Self::CheckpointNotFound
            | Self::WalSizeMismatch { .. }
            | Self::EmptyWalEntry { .. }
            | Self::TimestampRegression { .. }
            | Self::CatalogCorrupt { .. }
            | Self::EmptyColumnLength
            | Self::IndexCorrupt { .. }
            | Self::Internal(_) => Severity::Fatal,
            Self::FileNotFound { .. }
            | Self::CheckpointFailed { .. }
            | Self::WalStopped
            | Self::RotationFailed { .. }
            | Self::NoSuchSegment { .. }
            | Self::Unsupported(_) => Severity::Recoverable,
            Self::NoSuchDatabase { .. }
            | Self::NoSuchTable { .. }
            | Self::NoSuchIndex { .. }
            | Self::NoSuchColumn { .. }
            | Self::DatabaseExists { .. }
            | Self::TableExists { .. }
            | Self::IndexExists { .. } => Severity::UserFacing,
        }
    }

    /// Whether this error breaks the durability contract.
    pub const fn is_fatal(&self) -> bool {
        matches!(self.severity(), Severity::Fatal)
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a WAL corruption error.
    pub fn wal_corrupt(detail: impl Into<String>) -> Self {
        Self::WalCorrupt {
            detail: detail.into(),
        }
    }

    /// Create a checkpoint failure.
    pub fn checkpoint_failed(detail: impl Into<String>) -> Self {
        Self::CheckpointFailed {
            detail: detail.into(),
        }
    }

    /// Create a not-supported error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }
}

/// Result type alias using `TephraError`.
pub type Result<T> = std::result::Result<T, TephraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TephraError::wal_corrupt("bad frame checksum at offset 64");
        assert_eq!(
            err.to_string(),
            "WAL is corrupt: bad frame checksum at offset 64"
        );

        let err = TephraError::WalSizeMismatch {
            expected: 100,
            actual: 96,
        };
        assert_eq!(
            err.to_string(),
            "WAL entry size mismatch: estimated 100, wrote 96"
        );
    }

    #[test]
    fn severity_classification() {
        assert_eq!(
            TephraError::CheckpointNotFound.severity(),
            Severity::Fatal
        );
        assert_eq!(
            TephraError::EmptyWalEntry { txn_id: 7 }.severity(),
            Severity::Fatal
        );
        assert_eq!(
            TephraError::checkpoint_failed("rename failed").severity(),
            Severity::Recoverable
        );
        assert_eq!(
            TephraError::NoSuchTable {
                name: "books".to_owned()
            }
            .severity(),
            Severity::UserFacing
        );
    }

    #[test]
    fn fatal_predicate() {
        assert!(TephraError::EmptyColumnLength.is_fatal());
        assert!(TephraError::internal("broken invariant").is_fatal());
        assert!(!TephraError::WalStopped.is_fatal());
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: TephraError = io_err.into();
        assert!(matches!(err, TephraError::Io(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn timestamp_regression_display() {
        let err = TephraError::TimestampRegression {
            what: "checkpoint",
            last: 50,
            new: 40,
        };
        assert_eq!(
            err.to_string(),
            "checkpoint: timestamp went backwards (50 -> 40)"
        );
    }
}
