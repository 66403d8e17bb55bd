//! WAL entry codec.
//!
//! Every length is little-endian. An entry payload is
//! `[u64 txn_id][u64 commit_ts][u32 cmd_count]` followed by `cmd_count`
//! tagged commands. [`WalEntry::encoded_payload_len`] pre-computes the
//! exact byte count; the writer treats any disagreement with the bytes
//! actually produced as a fatal invariant violation.

use tephra_error::{Result, TephraError};
use tephra_types::encoding::{
    append_f64_le, append_i64_le, append_str, append_u32_le, append_u64_le, append_u8, str_len,
    Reader,
};
use tephra_types::{
    BlockInfo, ColumnDef, DataBlock, IndexDef, IndexType, RowId, SegmentId, SegmentInfo, TableDef,
    TxnId, TxnTimestamp, Value, ValueType,
};

/// Tagged command variants carried by a WAL entry.
#[derive(Debug, Clone, PartialEq)]
pub enum WalCommand {
    CreateDatabase {
        db_name: String,
        db_dir_tail: String,
    },
    DropDatabase {
        db_name: String,
    },
    CreateTable {
        db_name: String,
        table_def: TableDef,
        table_dir_tail: String,
    },
    DropTable {
        db_name: String,
        table_name: String,
    },
    CreateIndex {
        db_name: String,
        table_name: String,
        index_def: IndexDef,
        index_dir_tail: String,
    },
    DropIndex {
        db_name: String,
        table_name: String,
        index_name: String,
    },
    Append {
        db_name: String,
        table_name: String,
        block: DataBlock,
    },
    Delete {
        db_name: String,
        table_name: String,
        row_ids: Vec<RowId>,
    },
    Import {
        db_name: String,
        table_name: String,
        segment_info: SegmentInfo,
    },
    Compact {
        db_name: String,
        table_name: String,
        new_segment_infos: Vec<SegmentInfo>,
        deprecated_segment_ids: Vec<SegmentId>,
    },
    Checkpoint {
        is_full: bool,
        max_commit_ts: TxnTimestamp,
        catalog_path: String,
    },
    AlterInfo {
        db_name: String,
        table_name: String,
        new_table_name: String,
    },
}

impl WalCommand {
    /// Stable wire tag.
    #[must_use]
    pub const fn type_tag(&self) -> u8 {
        match self {
            Self::CreateDatabase { .. } => 0,
            Self::DropDatabase { .. } => 1,
            Self::CreateTable { .. } => 2,
            Self::DropTable { .. } => 3,
            Self::CreateIndex { .. } => 4,
            Self::DropIndex { .. } => 5,
            Self::Append { .. } => 6,
            Self::Delete { .. } => 7,
            Self::Import { .. } => 8,
            Self::Compact { .. } => 9,
            Self::Checkpoint { .. } => 10,
            Self::AlterInfo { .. } => 11,
        }
    }

    /// Human-readable command name for logs.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::CreateDatabase { .. } => "create_database",
            Self::DropDatabase { .. } => "drop_database",
            Self::CreateTable { .. } => "create_table",
            Self::DropTable { .. } => "drop_table",
            Self::CreateIndex { .. } => "create_index",
            Self::DropIndex { .. } => "drop_index",
            Self::Append { .. } => "append",
            Self::Delete { .. } => "delete",
            Self::Import { .. } => "import",
            Self::Compact { .. } => "compact",
            Self::Checkpoint { .. } => "checkpoint",
            Self::AlterInfo { .. } => "alter_info",
        }
    }

    /// Exact encoded size of this command, tag included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Self::CreateDatabase {
                db_name,
                db_dir_tail,
            } => str_len(db_name) + str_len(db_dir_tail),
            Self::DropDatabase { db_name } => str_len(db_name),
            Self::CreateTable {
                db_name,
                table_def,
                table_dir_tail,
            } => str_len(db_name) + table_def_len(table_def) + str_len(table_dir_tail),
            Self::DropTable {
                db_name,
                table_name,
            } => str_len(db_name) + str_len(table_name),
            Self::CreateIndex {
                db_name,
                table_name,
                index_def,
                index_dir_tail,
            } => {
                str_len(db_name)
                    + str_len(table_name)
                    + index_def_len(index_def)
                    + str_len(index_dir_tail)
            }
            Self::DropIndex {
                db_name,
                table_name,
                index_name,
            } => str_len(db_name) + str_len(table_name) + str_len(index_name),
            Self::Append {
                db_name,
                table_name,
                block,
            } => str_len(db_name) + str_len(table_name) + data_block_len(block),
            Self::Delete {
                db_name,
                table_name,
                row_ids,
            } => str_len(db_name) + str_len(table_name) + 4 + 8 * row_ids.len(),
            Self::Import {
                db_name,
                table_name,
                segment_info,
            } => str_len(db_name) + str_len(table_name) + segment_info_len(segment_info),
            Self::Compact {
                db_name,
                table_name,
                new_segment_infos,
                deprecated_segment_ids,
            } => {
                str_len(db_name)
                    + str_len(table_name)
                    + 4
                    + new_segment_infos
                        .iter()
                        .map(segment_info_len)
                        .sum::<usize>()
                    + 4
                    + 4 * deprecated_segment_ids.len()
            }
            Self::Checkpoint { catalog_path, .. } => 1 + 8 + str_len(catalog_path),
            Self::AlterInfo {
                db_name,
                table_name,
                new_table_name,
            } => str_len(db_name) + str_len(table_name) + str_len(new_table_name),
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        append_u8(buf, self.type_tag());
        match self {
            Self::CreateDatabase {
                db_name,
                db_dir_tail,
            } => {
                append_str(buf, db_name);
                append_str(buf, db_dir_tail);
            }
            Self::DropDatabase { db_name } => append_str(buf, db_name),
            Self::CreateTable {
                db_name,
                table_def,
                table_dir_tail,
            } => {
                append_str(buf, db_name);
                encode_table_def(buf, table_def);
                append_str(buf, table_dir_tail);
            }
            Self::DropTable {
                db_name,
                table_name,
            } => {
                append_str(buf, db_name);
                append_str(buf, table_name);
            }
            Self::CreateIndex {
                db_name,
                table_name,
                index_def,
                index_dir_tail,
            } => {
                append_str(buf, db_name);
                append_str(buf, table_name);
                encode_index_def(buf, index_def);
                append_str(buf, index_dir_tail);
            }
            Self::DropIndex {
                db_name,
                table_name,
                index_name,
            } => {
                append_str(buf, db_name);
                append_str(buf, table_name);
                append_str(buf, index_name);
            }
            Self::Append {
                db_name,
                table_name,
                block,
            } => {
                append_str(buf, db_name);
                append_str(buf, table_name);
                encode_data_block(buf, block);
            }
            Self::Delete {
                db_name,
                table_name,
                row_ids,
            } => {
                append_str(buf, db_name);
                append_str(buf, table_name);
                append_u32_le(buf, row_ids.len() as u32);
                for row_id in row_ids {
                    append_u64_le(buf, row_id.get());
                }
            }
            Self::Import {
                db_name,
                table_name,
                segment_info,
            } => {
                append_str(buf, db_name);
                append_str(buf, table_name);
                encode_segment_info(buf, segment_info);
            }
            Self::Compact {
                db_name,
                table_name,
                new_segment_infos,
                deprecated_segment_ids,
            } => {
                append_str(buf, db_name);
                append_str(buf, table_name);
                append_u32_le(buf, new_segment_infos.len() as u32);
                for info in new_segment_infos {
                    encode_segment_info(buf, info);
                }
                append_u32_le(buf, deprecated_segment_ids.len() as u32);
                for segment_id in deprecated_segment_ids {
                    append_u32_le(buf, *segment_id);
                }
            }
            Self::Checkpoint {
                is_full,
                max_commit_ts,
                catalog_path,
            } => {
                append_u8(buf, u8::from(*is_full));
                append_u64_le(buf, *max_commit_ts);
                append_str(buf, catalog_path);
            }
            Self::AlterInfo {
                db_name,
                table_name,
                new_table_name,
            } => {
                append_str(buf, db_name);
                append_str(buf, table_name);
                append_str(buf, new_table_name);
            }
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let corrupt = |detail: &str| TephraError::wal_corrupt(format!("command: {detail}"));
        let tag = r.read_u8().ok_or_else(|| corrupt("missing tag"))?;
        let cmd = match tag {
            0 => Self::CreateDatabase {
                db_name: read_str(r)?,
                db_dir_tail: read_str(r)?,
            },
            1 => Self::DropDatabase {
                db_name: read_str(r)?,
            },
            2 => Self::CreateTable {
                db_name: read_str(r)?,
                table_def: decode_table_def(r)?,
                table_dir_tail: read_str(r)?,
            },
            3 => Self::DropTable {
                db_name: read_str(r)?,
                table_name: read_str(r)?,
            },
            4 => Self::CreateIndex {
                db_name: read_str(r)?,
                table_name: read_str(r)?,
                index_def: decode_index_def(r)?,
                index_dir_tail: read_str(r)?,
            },
            5 => Self::DropIndex {
                db_name: read_str(r)?,
                table_name: read_str(r)?,
                index_name: read_str(r)?,
            },
            6 => Self::Append {
                db_name: read_str(r)?,
                table_name: read_str(r)?,
                block: decode_data_block(r)?,
            },
            7 => {
                let db_name = read_str(r)?;
                let table_name = read_str(r)?;
                let count = read_u32(r)?;
                let mut row_ids = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    row_ids.push(RowId::new(read_u64(r)?));
                }
                Self::Delete {
                    db_name,
                    table_name,
                    row_ids,
                }
            }
            8 => Self::Import {
                db_name: read_str(r)?,
                table_name: read_str(r)?,
                segment_info: decode_segment_info(r)?,
            },
            9 => {
                let db_name = read_str(r)?;
                let table_name = read_str(r)?;
                let info_count = read_u32(r)?;
                let mut new_segment_infos = Vec::with_capacity(info_count as usize);
                for _ in 0..info_count {
                    new_segment_infos.push(decode_segment_info(r)?);
                }
                let id_count = read_u32(r)?;
                let mut deprecated_segment_ids = Vec::with_capacity(id_count as usize);
                for _ in 0..id_count {
                    deprecated_segment_ids.push(read_u32(r)?);
                }
                Self::Compact {
                    db_name,
                    table_name,
                    new_segment_infos,
                    deprecated_segment_ids,
                }
            }
            10 => Self::Checkpoint {
                is_full: r.read_u8().ok_or_else(|| corrupt("checkpoint kind"))? != 0,
                max_commit_ts: read_u64(r)?,
                catalog_path: read_str(r)?,
            },
            11 => Self::AlterInfo {
                db_name: read_str(r)?,
                table_name: read_str(r)?,
                new_table_name: read_str(r)?,
            },
            other => {
                return Err(TephraError::wal_corrupt(format!(
                    "unknown command tag {other}"
                )))
            }
        };
        Ok(cmd)
    }
}

// ---------------------------------------------------------------------------
// Nested payload codecs
// ---------------------------------------------------------------------------

fn read_str(r: &mut Reader<'_>) -> Result<String> {
    r.read_str()
        .ok_or_else(|| TephraError::wal_corrupt("truncated string"))
}

fn read_u32(r: &mut Reader<'_>) -> Result<u32> {
    r.read_u32_le()
        .ok_or_else(|| TephraError::wal_corrupt("truncated u32"))
}

fn read_u64(r: &mut Reader<'_>) -> Result<u64> {
    r.read_u64_le()
        .ok_or_else(|| TephraError::wal_corrupt("truncated u64"))
}

fn table_def_len(def: &TableDef) -> usize {
    str_len(&def.table_name)
        + 4
        + def
            .columns
            .iter()
            .map(|c| 8 + str_len(&c.name) + 1)
            .sum::<usize>()
}

fn encode_table_def(buf: &mut Vec<u8>, def: &TableDef) {
    append_str(buf, &def.table_name);
    append_u32_le(buf, def.columns.len() as u32);
    for column in &def.columns {
        append_u64_le(buf, column.id);
        append_str(buf, &column.name);
        append_u8(
            buf,
            match column.value_type {
                ValueType::Integer => 0,
                ValueType::Float => 1,
                ValueType::Varchar => 2,
            },
        );
    }
}

fn decode_table_def(r: &mut Reader<'_>) -> Result<TableDef> {
    let table_name = read_str(r)?;
    let count = read_u32(r)?;
    let mut columns = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = read_u64(r)?;
        let name = read_str(r)?;
        let value_type = match r
            .read_u8()
            .ok_or_else(|| TephraError::wal_corrupt("truncated value type"))?
        {
            0 => ValueType::Integer,
            1 => ValueType::Float,
            2 => ValueType::Varchar,
            other => {
                return Err(TephraError::wal_corrupt(format!(
                    "unknown value type tag {other}"
                )))
            }
        };
        columns.push(ColumnDef {
            id,
            name,
            value_type,
        });
    }
    Ok(TableDef {
        table_name,
        columns,
    })
}

fn index_def_len(def: &IndexDef) -> usize {
    str_len(&def.index_name) + 1 + str_len(&def.column_name) + str_len(&def.analyzer) + 4
}

fn encode_index_def(buf: &mut Vec<u8>, def: &IndexDef) {
    append_str(buf, &def.index_name);
    append_u8(
        buf,
        match def.index_type {
            IndexType::FullText => 0,
            IndexType::Secondary => 1,
        },
    );
    append_str(buf, &def.column_name);
    append_str(buf, &def.analyzer);
    append_u32_le(buf, def.flags.bits());
}

fn decode_index_def(r: &mut Reader<'_>) -> Result<IndexDef> {
    let index_name = read_str(r)?;
    let index_type = match r
        .read_u8()
        .ok_or_else(|| TephraError::wal_corrupt("truncated index type"))?
    {
        0 => IndexType::FullText,
        1 => IndexType::Secondary,
        other => {
            return Err(TephraError::wal_corrupt(format!(
                "unknown index type tag {other}"
            )))
        }
    };
    let column_name = read_str(r)?;
    let analyzer = read_str(r)?;
    let bits = read_u32(r)?;
    let flags = tephra_types::OptionFlags::from_bits(bits)
        .ok_or_else(|| TephraError::wal_corrupt("unknown index option flags"))?;
    Ok(IndexDef {
        index_name,
        index_type,
        column_name,
        analyzer,
        flags,
    })
}

fn value_len(value: &Value) -> usize {
    1 + match value {
        Value::Null => 0,
        Value::Integer(_) | Value::Float(_) => 8,
        Value::Varchar(s) => str_len(s),
    }
}

fn data_block_len(block: &DataBlock) -> usize {
    8 + block
        .columns()
        .iter()
        .flat_map(|column| column.iter().map(value_len))
        .sum::<usize>()
}

fn encode_data_block(buf: &mut Vec<u8>, block: &DataBlock) {
    append_u32_le(buf, block.column_count() as u32);
    append_u32_le(buf, block.row_count() as u32);
    for column in block.columns() {
        for value in column {
            append_u8(buf, value.type_tag());
            match value {
                Value::Null => {}
                Value::Integer(v) => append_i64_le(buf, *v),
                Value::Float(v) => append_f64_le(buf, *v),
                Value::Varchar(s) => append_str(buf, s),
            }
        }
    }
}

fn decode_data_block(r: &mut Reader<'_>) -> Result<DataBlock> {
    let column_count = read_u32(r)?;
    let row_count = read_u32(r)?;
    let mut columns = Vec::with_capacity(column_count as usize);
    for _ in 0..column_count {
        let mut column = Vec::with_capacity(row_count as usize);
        for _ in 0..row_count {
            let tag = r
                .read_u8()
                .ok_or_else(|| TephraError::wal_corrupt("truncated value"))?;
            column.push(match tag {
                0 => Value::Null,
                1 => Value::Integer(
                    r.read_i64_le()
                        .ok_or_else(|| TephraError::wal_corrupt("truncated integer"))?,
                ),
                2 => Value::Float(
                    r.read_f64_le()
                        .ok_or_else(|| TephraError::wal_corrupt("truncated float"))?,
                ),
                3 => Value::Varchar(read_str(r)?),
                other => {
                    return Err(TephraError::wal_corrupt(format!(
                        "unknown value tag {other}"
                    )))
                }
            });
        }
        columns.push(column);
    }
    DataBlock::new(columns).ok_or_else(|| TephraError::wal_corrupt("ragged data block"))
}

fn block_info_len(info: &BlockInfo) -> usize {
    8 + 8 + 4 + 12 * info.outline_infos.len()
}

fn segment_info_len(info: &SegmentInfo) -> usize {
    4 + 8 * 4 + 4 + info.block_infos.iter().map(block_info_len).sum::<usize>()
}

fn encode_segment_info(buf: &mut Vec<u8>, info: &SegmentInfo) {
    append_u32_le(buf, info.segment_id);
    append_u64_le(buf, info.column_count);
    append_u64_le(buf, info.row_count);
    append_u64_le(buf, info.actual_row_count);
    append_u64_le(buf, info.row_capacity);
    append_u32_le(buf, info.block_infos.len() as u32);
    for block in &info.block_infos {
        append_u64_le(buf, block.row_count);
        append_u64_le(buf, block.row_capacity);
        append_u32_le(buf, block.outline_infos.len() as u32);
        for (next_idx, last_off) in &block.outline_infos {
            append_u32_le(buf, *next_idx);
            append_u64_le(buf, *last_off);
        }
    }
}

fn decode_segment_info(r: &mut Reader<'_>) -> Result<SegmentInfo> {
    let segment_id = read_u32(r)?;
    let column_count = read_u64(r)?;
    let row_count = read_u64(r)?;
    let actual_row_count = read_u64(r)?;
    let row_capacity = read_u64(r)?;
    let block_count = read_u32(r)?;
    let mut block_infos = Vec::with_capacity(block_count as usize);
    for _ in 0..block_count {
        let block_row_count = read_u64(r)?;
        let block_row_capacity = read_u64(r)?;
        let outline_count = read_u32(r)?;
        let mut outline_infos = Vec::with_capacity(outline_count as usize);
        for _ in 0..outline_count {
            let next_idx = read_u32(r)?;
            let last_off = read_u64(r)?;
            outline_infos.push((next_idx, last_off));
        }
        block_infos.push(BlockInfo {
            row_count: block_row_count,
            row_capacity: block_row_capacity,
            outline_infos,
        });
    }
    Ok(SegmentInfo {
        segment_id,
        column_count,
        row_count,
        actual_row_count,
        row_capacity,
        block_infos,
    })
}

// ---------------------------------------------------------------------------
// Entries and frames
// ---------------------------------------------------------------------------

/// One WAL entry: a committed transaction's command sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    pub txn_id: TxnId,
    pub commit_ts: TxnTimestamp,
    pub cmds: Vec<WalCommand>,
}

impl WalEntry {
    /// Exact encoded payload size.
    #[must_use]
    pub fn encoded_payload_len(&self) -> usize {
        8 + 8 + 4 + self.cmds.iter().map(WalCommand::encoded_len).sum::<usize>()
    }

    /// Frame size including length prefix and checksum trailer.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        4 + self.encoded_payload_len() + 4
    }

    /// Serialize the payload alone.
    #[must_use]
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_payload_len());
        append_u64_le(&mut buf, self.txn_id);
        append_u64_le(&mut buf, self.commit_ts);
        append_u32_le(&mut buf, self.cmds.len() as u32);
        for cmd in &self.cmds {
            cmd.encode(&mut buf);
        }
        buf
    }

    /// Serialize into a checksummed, length-prefixed frame.
    #[must_use]
    pub fn encode_frame(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        let mut frame = Vec::with_capacity(payload.len() + 8);
        append_u32_le(&mut frame, payload.len() as u32);
        frame.extend_from_slice(&payload);
        append_u32_le(&mut frame, crc32fast::hash(&payload));
        frame
    }

    /// Decode one payload.
    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let txn_id = read_u64(&mut r)?;
        let commit_ts = read_u64(&mut r)?;
        let cmd_count = read_u32(&mut r)?;
        let mut cmds = Vec::with_capacity(cmd_count as usize);
        for _ in 0..cmd_count {
            cmds.push(WalCommand::decode(&mut r)?);
        }
        if r.remaining() != 0 {
            return Err(TephraError::wal_corrupt("trailing bytes in entry payload"));
        }
        Ok(Self {
            txn_id,
            commit_ts,
            cmds,
        })
    }

    /// The checkpoint command in this entry, if any.
    #[must_use]
    pub fn checkpoint_cmd(&self) -> Option<(&WalCommand, bool, TxnTimestamp, &str)> {
        self.cmds.iter().find_map(|cmd| match cmd {
            WalCommand::Checkpoint {
                is_full,
                max_commit_ts,
                catalog_path,
            } => Some((cmd, *is_full, *max_commit_ts, catalog_path.as_str())),
            _ => None,
        })
    }
}

/// What the decoder found at the end of a WAL file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailStatus {
    /// Every frame decoded.
    Clean,
    /// The final frame is truncated or fails its checksum; everything
    /// before it decoded. Legal only for the current file (a write
    /// interrupted by a crash).
    Torn { detail: String },
}

/// Decode a whole WAL file into entries.
///
/// A bad frame anywhere but the very end is fatal corruption; a bad frame
/// at the end is reported as [`TailStatus::Torn`] and the caller decides
/// whether the file may legally have one.
pub fn decode_file(buf: &[u8]) -> Result<(Vec<WalEntry>, TailStatus)> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        let remaining = buf.len() - pos;
        if remaining < 8 {
            return Ok((
                entries,
                TailStatus::Torn {
                    detail: format!("{remaining} trailing bytes, too short for a frame"),
                },
            ));
        }
        let size =
            u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
        let frame_end = pos + 4 + size + 4;
        if frame_end > buf.len() {
            return Ok((
                entries,
                TailStatus::Torn {
                    detail: format!("frame at offset {pos} claims {size} bytes past end of file"),
                },
            ));
        }
        let payload = &buf[pos + 4..pos + 4 + size];
        let stored_crc = u32::from_le_bytes([
            buf[frame_end - 4],
            buf[frame_end - 3],
            buf[frame_end - 2],
            buf[frame_end - 1],
        ]);
        if crc32fast::hash(payload) != stored_crc {
            let detail = format!("frame at offset {pos} fails checksum");
            if frame_end == buf.len() {
                return Ok((entries, TailStatus::Torn { detail }));
            }
            return Err(TephraError::wal_corrupt(detail));
        }
        entries.push(WalEntry::decode_payload(payload)?);
        pos = frame_end;
    }
    Ok((entries, TailStatus::Clean))
}
