//! Full-text inverted index read path.
//!
//! A column's index is a union of immutable on-disk sub-segments plus at
//! most one in-memory segment still being built. [`ColumnIndexReader`]
//! serves term lookups over that union in base-row-id order;
//! [`TableIndexReaderCache`] shares reader structures across transactions
//! that observe the same committed state.

pub mod blockmax;
pub mod column_reader;
pub mod format;
pub mod posting;
pub mod reader_cache;
pub mod segment;

pub use blockmax::BlockMaxTermDocIterator;
pub use column_reader::{ColumnIndexReader, SegmentIndexSnapshot};
pub use posting::{DocPosting, PostingData, PostingIterator, SegmentPosting, POSTING_BLOCK_SIZE};
pub use reader_cache::{FulltextIndexMeta, IndexReader, TableIndexReaderCache};
pub use segment::{
    tokenize, DiskIndexSegmentReader, InMemIndexSegmentReader, IndexSegmentReader, MemoryIndexer,
};
