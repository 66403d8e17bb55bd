//! Per-command application against the catalog.
//!
//! These handlers are shared by two callers: the commit-bottom phase of a
//! live transaction (applying effects after durability) and startup replay
//! (re-applying the WAL tail after the checkpoint's catalog was reloaded).
//! They must therefore derive every effect from the command payload plus
//! `(txn_id, commit_ts)` alone.

use tephra_catalog::{BufferManager, Catalog};
use tephra_error::{Result, TephraError};
use tephra_types::{TxnId, TxnTimestamp};
use tracing::trace;

use crate::entry::WalCommand;

/// Apply one command's effects at `(txn_id, commit_ts)`.
pub fn apply_command(
    catalog: &Catalog,
    buffer: &BufferManager,
    cmd: &WalCommand,
    txn_id: TxnId,
    commit_ts: TxnTimestamp,
) -> Result<()> {
    trace!(cmd = cmd.type_name(), txn_id, commit_ts, "applying command");
    match cmd {
        WalCommand::CreateDatabase {
            db_name,
            db_dir_tail,
        } => {
            catalog.create_database_replay(db_name, db_dir_tail, txn_id, commit_ts)?;
        }
        WalCommand::DropDatabase { db_name } => {
            catalog.drop_database_replay(db_name, txn_id, commit_ts)?;
        }
        WalCommand::CreateTable {
            db_name,
            table_def,
            table_dir_tail,
        } => {
            let db = catalog.get_database_replay(db_name)?;
            db.create_table_replay(table_def, table_dir_tail, txn_id, commit_ts)?;
        }
        WalCommand::DropTable {
            db_name,
            table_name,
        } => {
            let db = catalog.get_database_replay(db_name)?;
            db.drop_table_replay(table_name, txn_id, commit_ts)?;
        }
        WalCommand::CreateIndex {
            db_name,
            table_name,
            index_def,
            index_dir_tail,
        } => {
            let table = catalog.get_table_replay(db_name, table_name)?;
            let index = table.create_index_replay(
                index_def.clone(),
                index_dir_tail,
                txn_id,
                commit_ts,
            )?;
            // Re-execute the build against already-applied row data.
            table.build_fulltext_index(buffer, &index, commit_ts)?;
            table.touch(commit_ts);
        }
        WalCommand::DropIndex {
            db_name,
            table_name,
            index_name,
        } => {
            let table = catalog.get_table_replay(db_name, table_name)?;
            table.drop_index_replay(index_name, txn_id, commit_ts)?;
            table.touch(commit_ts);
        }
        WalCommand::Append {
            db_name,
            table_name,
            block,
        } => {
            let table = catalog.get_table_replay(db_name, table_name)?;
            let (segment_id, start_row, _rows) = table.append(buffer, block, commit_ts)?;
            table.fulltext_ingest(block, segment_id, start_row, commit_ts)?;
            table.touch(commit_ts);
        }
        WalCommand::Delete {
            db_name,
            table_name,
            row_ids,
        } => {
            let table = catalog.get_table_replay(db_name, table_name)?;
            table.delete_rows(row_ids)?;
            table.touch(commit_ts);
        }
        WalCommand::Import {
            db_name,
            table_name,
            segment_info,
        } => {
            let table = catalog.get_table_replay(db_name, table_name)?;
            table.add_segment_replay(segment_info, commit_ts)?;
            table.touch(commit_ts);
        }
        WalCommand::Compact {
            db_name,
            table_name,
            new_segment_infos,
            deprecated_segment_ids,
        } => {
            let table = catalog.get_table_replay(db_name, table_name)?;
            for info in new_segment_infos {
                table.add_segment_replay(info, commit_ts)?;
            }
            table.deprecate_segments(deprecated_segment_ids, commit_ts)?;
            table.touch(commit_ts);
        }
        WalCommand::Checkpoint { .. } => {
            // Checkpoints mark durability boundaries; they carry no
            // catalog effect of their own.
        }
        WalCommand::AlterInfo { .. } => {
            return Err(TephraError::unsupported("alter_info replay"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use tephra_types::{
        ColumnDef, DataBlock, SegmentInfo, TableDef, Value, ValueType,
    };
    use tephra_vfs::MemoryVfs;

    use super::*;

    fn setup() -> (Catalog, BufferManager) {
        let catalog = Catalog::new(
            Arc::new(MemoryVfs::new()),
            PathBuf::from("data"),
            PathBuf::from("catalog"),
        );
        (catalog, BufferManager::new())
    }

    fn create_table_cmds() -> Vec<WalCommand> {
        vec![
            WalCommand::CreateDatabase {
                db_name: "db0".to_owned(),
                db_dir_tail: "db0".to_owned(),
            },
            WalCommand::CreateTable {
                db_name: "db0".to_owned(),
                table_def: TableDef {
                    table_name: "books".to_owned(),
                    columns: vec![ColumnDef {
                        id: 0,
                        name: "body".to_owned(),
                        value_type: ValueType::Varchar,
                    }],
                },
                table_dir_tail: "books".to_owned(),
            },
        ]
    }

    #[test]
    fn ddl_and_dml_round_trip_through_catalog() {
        let (catalog, buffer) = setup();
        for (i, cmd) in create_table_cmds().iter().enumerate() {
            apply_command(&catalog, &buffer, cmd, 1, 10 + i as u64).expect("apply");
        }
        let append = WalCommand::Append {
            db_name: "db0".to_owned(),
            table_name: "books".to_owned(),
            block: DataBlock::new(vec![vec![
                Value::Varchar("hello".to_owned()),
                Value::Varchar("world".to_owned()),
            ]])
            .expect("block"),
        };
        apply_command(&catalog, &buffer, &append, 2, 12).expect("append");

        let table = catalog.get_table("db0", "books", 12).expect("table");
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.last_change_ts(), 12);
    }

    #[test]
    fn import_and_compact_mutate_segments() {
        let (catalog, buffer) = setup();
        for (i, cmd) in create_table_cmds().iter().enumerate() {
            apply_command(&catalog, &buffer, cmd, 1, 10 + i as u64).expect("apply");
        }
        let info = SegmentInfo {
            segment_id: 0,
            column_count: 1,
            row_count: 10,
            actual_row_count: 10,
            row_capacity: 8192,
            block_infos: Vec::new(),
        };
        apply_command(
            &catalog,
            &buffer,
            &WalCommand::Import {
                db_name: "db0".to_owned(),
                table_name: "books".to_owned(),
                segment_info: info.clone(),
            },
            2,
            20,
        )
        .expect("import");

        let compact = WalCommand::Compact {
            db_name: "db0".to_owned(),
            table_name: "books".to_owned(),
            new_segment_infos: vec![SegmentInfo {
                segment_id: 1,
                ..info
            }],
            deprecated_segment_ids: vec![0],
        };
        apply_command(&catalog, &buffer, &compact, 3, 30).expect("compact");

        let table = catalog.get_table("db0", "books", 30).expect("table");
        assert!(!table.get_segment(0).expect("seg 0").is_visible(30));
        assert!(table.get_segment(1).expect("seg 1").is_visible(30));
    }

    #[test]
    fn alter_info_is_unsupported() {
        let (catalog, buffer) = setup();
        let err = apply_command(
            &catalog,
            &buffer,
            &WalCommand::AlterInfo {
                db_name: "db0".to_owned(),
                table_name: "books".to_owned(),
                new_table_name: "books2".to_owned(),
            },
            1,
            10,
        )
        .expect_err("unsupported");
        assert!(matches!(err, TephraError::Unsupported(_)));
    }

    #[test]
    fn checkpoint_command_is_a_noop() {
        let (catalog, buffer) = setup();
        apply_command(
            &catalog,
            &buffer,
            &WalCommand::Checkpoint {
                is_full: true,
                max_commit_ts: 5,
                catalog_path: "catalog/full.catalog.5.json".to_owned(),
            },
            1,
            10,
        )
        .expect("noop");
    }
}
