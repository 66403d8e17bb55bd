//! Column-level index reader: the union of all sub-segments of a column.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tephra_error::{Result, TephraError};
use tephra_types::{OptionFlags, RowId, SegmentId, INVALID_ROWID};
use tephra_vfs::Vfs;
use tracing::trace;

use crate::blockmax::BlockMaxTermDocIterator;
use crate::posting::{PostingIterator, SegmentPosting};
use crate::segment::{
    DiskIndexSegmentReader, InMemIndexSegmentReader, IndexSegmentReader, MemoryIndexer,
};

/// Point-in-time view of one segment's contribution to a column index:
/// the sealed sub-segments plus the optional in-memory tail, and the
/// column-length accounting used for BM25 normalization.
#[derive(Clone, Default)]
pub struct SegmentIndexSnapshot {
    /// `(base_name, base_row_id)` per sealed sub-segment, in row order.
    pub sealed: Vec<(String, RowId)>,
    /// Still-building tail, if any.
    pub memory: Option<Arc<MemoryIndexer>>,
    /// Sum of indexed column lengths across sealed sub-segments, in tokens.
    pub column_length_sum: u64,
    /// Documents across sealed sub-segments.
    pub document_count: u32,
}

impl SegmentIndexSnapshot {
    /// Length info including the in-memory tail.
    #[must_use]
    fn length_info(&self) -> (u64, u32) {
        let mut sum = self.column_length_sum;
        let mut count = self.document_count;
        if let Some(mem) = &self.memory {
            sum += mem.column_length_sum();
            count += mem.doc_count();
        }
        (sum, count)
    }
}

/// Reader over every sub-segment of one column's fulltext index.
///
/// Immutable once opened; shared by reference between queries. Sub-segment
/// readers are held in base-row-id order so collected postings preserve
/// global document order; `base_row_ids` carries a trailing
/// [`INVALID_ROWID`] sentinel.
pub struct ColumnIndexReader {
    flags: OptionFlags,
    index_dir: PathBuf,
    segment_readers: Vec<Box<dyn IndexSegmentReader>>,
    base_row_ids: Vec<RowId>,
    length_info: Vec<(u64, u32)>,
}

impl ColumnIndexReader {
    /// Open readers for every sub-segment in `index_by_segment`.
    ///
    /// Segment ids iterate in ascending order; within a segment, sealed
    /// sub-segments come before the in-memory tail, which is included only
    /// when it has indexed at least one document.
    pub fn open(
        vfs: &dyn Vfs,
        flags: OptionFlags,
        index_dir: PathBuf,
        index_by_segment: &BTreeMap<SegmentId, SegmentIndexSnapshot>,
    ) -> Result<Self> {
        let mut segment_readers: Vec<Box<dyn IndexSegmentReader>> = Vec::new();
        let mut base_row_ids = Vec::new();
        let mut length_info = Vec::new();
        for (segment_id, snapshot) in index_by_segment {
            for (base_name, base_row_id) in &snapshot.sealed {
                trace!(
                    segment_id = *segment_id,
                    base_name = %base_name,
                    base_row_id = %base_row_id,
                    "opening disk sub-segment"
                );
                let reader =
                    DiskIndexSegmentReader::open(vfs, &index_dir, base_name, *base_row_id)?;
                segment_readers.push(Box::new(reader));
                base_row_ids.push(*base_row_id);
            }
            if let Some(memory) = &snapshot.memory {
                if memory.doc_count() != 0 {
                    base_row_ids.push(memory.base_row_id());
                    segment_readers.push(Box::new(InMemIndexSegmentReader::new(Arc::clone(
                        memory,
                    ))));
                }
            }
            length_info.push(snapshot.length_info());
        }
        debug_assert!(base_row_ids.windows(2).all(|w| w[0] <= w[1]));
        base_row_ids.push(INVALID_ROWID);
        Ok(Self {
            flags,
            index_dir,
            segment_readers,
            base_row_ids,
            length_info,
        })
    }

    /// Option flags the index was created with.
    #[must_use]
    pub fn flags(&self) -> OptionFlags {
        self.flags
    }

    /// Directory holding the index's sub-segment files.
    #[must_use]
    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Base row ids of the open sub-segments, terminated by the sentinel.
    #[must_use]
    pub fn base_row_ids(&self) -> &[RowId] {
        &self.base_row_ids
    }

    fn collect(&self, term: &str) -> Vec<SegmentPosting> {
        self.segment_readers
            .iter()
            .filter_map(|reader| reader.segment_posting(term))
            .collect()
    }

    /// Iterate the term's documents across all sub-segments, in row order.
    /// Returns `None` when no segment contains the term.
    #[must_use]
    pub fn lookup(&self, term: &str) -> Option<PostingIterator> {
        let postings = self.collect(term);
        if postings.is_empty() {
            return None;
        }
        Some(PostingIterator::new(postings))
    }

    /// Same collection as [`Self::lookup`] but with block-max skipping for
    /// top-k scoring; `weight` is folded into the iterator's score.
    #[must_use]
    pub fn lookup_block_max(&self, term: &str, weight: f32) -> Option<BlockMaxTermDocIterator> {
        let postings = self.collect(term);
        if postings.is_empty() {
            return None;
        }
        let mut iter = BlockMaxTermDocIterator::new(postings);
        iter.multiply_weight(weight);
        Some(iter)
    }

    /// Average indexed column length across all segments.
    ///
    /// Consulting a reader before any document is indexed is an invariant
    /// violation and returns a fatal error.
    pub fn avg_column_length(&self) -> Result<f32> {
        let mut sum = 0u64;
        let mut count = 0u32;
        for (seg_sum, seg_count) in &self.length_info {
            sum += seg_sum;
            count += seg_count;
        }
        if count == 0 {
            return Err(TephraError::EmptyColumnLength);
        }
        Ok(sum as f32 / count as f32)
    }
}
