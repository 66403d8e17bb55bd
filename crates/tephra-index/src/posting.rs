//! Posting lists and the multi-segment posting iterator.

use std::sync::Arc;

use tephra_types::RowId;

/// Documents per skip block. Block-max metadata is kept at this
/// granularity.
pub const POSTING_BLOCK_SIZE: usize = 128;

/// One document occurrence of a term inside a segment.
///
/// `doc_off` is the row offset relative to the segment's base row id, so
/// posting lists stay stable when segments are relocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocPosting {
    pub doc_off: u32,
    pub term_freq: u32,
}

/// Skip metadata for one block of [`POSTING_BLOCK_SIZE`] postings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    /// Last `doc_off` in the block.
    pub last_doc_off: u32,
    /// Maximum term frequency in the block.
    pub max_term_freq: u32,
}

/// Decoded posting list for one term in one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingData {
    docs: Vec<DocPosting>,
    blocks: Vec<BlockMeta>,
}

impl PostingData {
    /// Build a posting list from doc postings sorted by `doc_off`.
    /// Block metadata is derived.
    #[must_use]
    pub fn from_docs(docs: Vec<DocPosting>) -> Self {
        debug_assert!(docs.windows(2).all(|w| w[0].doc_off < w[1].doc_off));
        let blocks = docs
            .chunks(POSTING_BLOCK_SIZE)
            .map(|chunk| BlockMeta {
                last_doc_off: chunk.last().map_or(0, |d| d.doc_off),
                max_term_freq: chunk.iter().map(|d| d.term_freq).max().unwrap_or(0),
            })
            .collect();
        Self { docs, blocks }
    }

    /// Number of documents containing the term in this segment.
    #[must_use]
    pub fn doc_freq(&self) -> u32 {
        self.docs.len() as u32
    }

    /// Doc postings in `doc_off` order.
    #[must_use]
    pub fn docs(&self) -> &[DocPosting] {
        &self.docs
    }

    /// Skip blocks in order.
    #[must_use]
    pub fn blocks(&self) -> &[BlockMeta] {
        &self.blocks
    }
}

/// A term's posting list positioned in the global row space.
#[derive(Debug, Clone)]
pub struct SegmentPosting {
    /// First row id of the owning segment.
    pub base_row_id: RowId,
    /// Shared decoded postings.
    pub posting: Arc<PostingData>,
}

impl SegmentPosting {
    /// Global row id of the posting at `idx`.
    #[must_use]
    fn row_id_at(&self, idx: usize) -> RowId {
        self.base_row_id.offset(u64::from(self.posting.docs()[idx].doc_off))
    }
}

/// Iterator over a term's documents across all segments of a column.
///
/// Segments are visited in the order collected by the column reader, which
/// is base-row-id order, so yielded row ids are strictly increasing.
#[derive(Debug)]
pub struct PostingIterator {
    postings: Vec<SegmentPosting>,
    seg: usize,
    idx: usize,
    current: Option<(RowId, u32)>,
}

impl PostingIterator {
    /// Create an iterator over non-empty collected postings.
    #[must_use]
    pub fn new(postings: Vec<SegmentPosting>) -> Self {
        Self {
            postings,
            seg: 0,
            idx: 0,
            current: None,
        }
    }

    /// Total documents across all segments.
    #[must_use]
    pub fn doc_freq(&self) -> u32 {
        self.postings.iter().map(|p| p.posting.doc_freq()).sum()
    }

    /// Advance to the next document. Returns its global row id.
    pub fn next_doc(&mut self) -> Option<RowId> {
        while self.seg < self.postings.len() {
            let seg = &self.postings[self.seg];
            if self.idx < seg.posting.docs().len() {
                let row_id = seg.row_id_at(self.idx);
                let tf = seg.posting.docs()[self.idx].term_freq;
                self.idx += 1;
                self.current = Some((row_id, tf));
                return Some(row_id);
            }
            self.seg += 1;
            self.idx = 0;
        }
        self.current = None;
        None
    }

    /// Advance to the first document with row id `>= target`.
    pub fn seek(&mut self, target: RowId) -> Option<RowId> {
        if let Some((current, _)) = self.current {
            if current >= target {
                return Some(current);
            }
        }
        while self.seg < self.postings.len() {
            let seg = &self.postings[self.seg];
            let docs = seg.posting.docs();
            if let Some(last) = docs.last() {
                let seg_last = seg.base_row_id.offset(u64::from(last.doc_off));
                if seg_last < target {
                    // Whole segment is below the target.
                    self.seg += 1;
                    self.idx = 0;
                    continue;
                }
            }
            while self.idx < docs.len() {
                let row_id = seg.row_id_at(self.idx);
                if row_id >= target {
                    self.current = Some((row_id, docs[self.idx].term_freq));
                    self.idx += 1;
                    return Some(row_id);
                }
                self.idx += 1;
            }
            self.seg += 1;
            self.idx = 0;
        }
        self.current = None;
        None
    }

    /// Term frequency of the current document.
    #[must_use]
    pub fn term_freq(&self) -> Option<u32> {
        self.current.map(|(_, tf)| tf)
    }

    /// Current document, if positioned.
    #[must_use]
    pub fn current_doc(&self) -> Option<RowId> {
        self.current.map(|(row_id, _)| row_id)
    }
}
