//! Write-ahead log manager.
//!
//! Committed transactions hand entries to a single dedicated writer
//! thread which batches, serializes, appends, and flushes them, then makes
//! each transaction visible in WAL order. Rotation, checkpoint
//! coordination, and crash replay live here too.
//!
//! The on-disk format is a concatenation of frames:
//!
//! ```text
//! [u32 size_le][payload of size bytes][u32 crc32_le over payload]
//! ```
//!
//! with each payload decoding to one [`WalEntry`].

pub mod apply;
pub mod checkpoint;
pub mod entry;
pub mod manager;
pub mod registry;
pub mod replay;

pub use checkpoint::{CheckpointCoordinator, CheckpointKind};
pub use entry::{decode_file, TailStatus, WalCommand, WalEntry};
pub use manager::{BackgroundExecutor, CommitSink, WalManager};
pub use registry::{WalFileInfo, WAL_FILE_NAME};
pub use replay::{replay, ReplayOutcome};
