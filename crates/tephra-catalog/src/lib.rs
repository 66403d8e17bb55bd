//! MVCC catalog for the Tephra engine.
//!
//! The catalog is the in-memory source of truth for databases, tables,
//! segments, and indexes. Mutations land as versioned entry records keyed
//! by `(txn_id, commit_ts)`; readers resolve names against their snapshot's
//! `begin_ts`. Checkpoints persist the catalog as full or delta JSON
//! snapshots which replay reloads before re-applying the WAL tail.

pub mod buffer;
pub mod catalog;
pub mod db;
pub mod entry;
pub mod index_entry;
pub mod snapshot;
pub mod table;

pub use buffer::BufferManager;
pub use catalog::Catalog;
pub use db::DbEntry;
pub use entry::{EntryList, EntryRecord};
pub use index_entry::{SegmentIndexEntry, TableIndexEntry};
pub use table::{BlockEntry, SegmentEntry, TableEntry};
