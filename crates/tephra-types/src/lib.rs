//! Core cross-cutting types for the Tephra storage engine: MVCC
//! identifiers, the row-value model, fulltext index option flags, and the
//! storage configuration surface.

pub mod config;
pub mod encoding;
pub mod flags;
pub mod schema;
pub mod value;

pub use config::{FlushOption, StorageConfig};
pub use flags::OptionFlags;
pub use schema::{
    BlockInfo, ColumnDef, IndexDef, IndexType, SegmentInfo, SegmentStatus, TableDef,
};
pub use value::{DataBlock, Value, ValueType};

use std::fmt;

/// Transaction identifier assigned by the transaction manager.
pub type TxnId = u64;

/// Commit / begin timestamp. Strictly monotonic across persisted commits;
/// orders durability and visibility.
pub type TxnTimestamp = u64;

/// Timestamp sentinel for "not committed yet".
pub const UNCOMMIT_TS: TxnTimestamp = u64::MAX;

/// Segment identifier within a table.
pub type SegmentId = u32;

/// Block identifier within a segment.
pub type BlockId = u16;

/// Column identifier within a table.
pub type ColumnId = u64;

/// Sentinel for "no segment".
pub const INVALID_SEGMENT_ID: SegmentId = SegmentId::MAX;

/// Default row capacity of a segment.
pub const DEFAULT_SEGMENT_CAPACITY: u64 = 8192 * 1024;

/// Default row capacity of a block.
pub const DEFAULT_BLOCK_CAPACITY: u64 = 8192;

/// Global row identifier.
///
/// Rows are addressed by a flat 64-bit position: each segment owns a
/// contiguous run starting at its base row id, blocks subdivide the run.
/// [`RowId::INVALID`] terminates ordered base-row-id sequences.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct RowId(u64);

/// Sentinel row id appended after the last segment base.
pub const INVALID_ROWID: RowId = RowId(u64::MAX);

impl RowId {
    /// Sentinel value; compares greater than every real row id.
    pub const INVALID: Self = INVALID_ROWID;

    /// Construct from a raw position.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw 64-bit position.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the sentinel.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != u64::MAX
    }

    /// Row id `offset` rows past this one.
    #[inline]
    #[must_use]
    pub const fn offset(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "row#{}", self.0)
        } else {
            f.write_str("row#INVALID")
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
