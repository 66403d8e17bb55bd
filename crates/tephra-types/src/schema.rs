//! Schema and segment-layout descriptors shared by the WAL codec, the
//! catalog, and replay.

use serde::{Deserialize, Serialize};

use crate::value::ValueType;
use crate::{ColumnId, OptionFlags, SegmentId};

/// Column definition within a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub id: ColumnId,
    pub name: String,
    pub value_type: ValueType,
}

/// Table definition as carried by a `CreateTable` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Column id for `name`, if the table has it.
    #[must_use]
    pub fn column_id(&self, name: &str) -> Option<ColumnId> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.id)
    }
}

/// Kind of a table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    /// Inverted fulltext index.
    FullText,
    /// Plain secondary index (no reader support in the core).
    Secondary,
}

/// Index definition as carried by a `CreateIndex` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub index_name: String,
    pub index_type: IndexType,
    pub column_name: String,
    /// Analyzer id; only meaningful for fulltext indexes.
    pub analyzer: String,
    pub flags: OptionFlags,
}

/// Lifecycle of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentStatus {
    /// Accepting appended rows.
    Unsealed,
    /// Immutable.
    Sealed,
    /// Being consumed by a compaction.
    Compacting,
    /// Compaction input; deletes are forbidden while the output commits.
    NoDelete,
    /// Replaced by a compaction output.
    Deprecated,
}

/// Per-block layout carried by `Import`/`Compact` commands.
///
/// `outline_infos` is one `(next_idx, last_off)` pair per column,
/// describing the column's out-of-line buffer position; replay passes it
/// through to block column reconstruction verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub row_count: u64,
    pub row_capacity: u64,
    pub outline_infos: Vec<(u32, u64)>,
}

/// Segment layout carried by `Import`/`Compact` commands: everything
/// replay needs to synthesize a sealed segment without reading data files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub segment_id: SegmentId,
    pub column_count: u64,
    pub row_count: u64,
    pub actual_row_count: u64,
    pub row_capacity: u64,
    pub block_infos: Vec<BlockInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_def_column_lookup() {
        let def = TableDef {
            table_name: "books".to_owned(),
            columns: vec![
                ColumnDef {
                    id: 0,
                    name: "id".to_owned(),
                    value_type: ValueType::Integer,
                },
                ColumnDef {
                    id: 1,
                    name: "body".to_owned(),
                    value_type: ValueType::Varchar,
                },
            ],
        };
        assert_eq!(def.column_id("body"), Some(1));
        assert_eq!(def.column_id("missing"), None);
    }
}
