//! Block-max term-document iteration for top-k scoring.
//!
//! Wraps the collected segment postings with per-block maximum term
//! frequencies so a scorer can skip whole blocks whose best possible
//! contribution cannot enter the current top-k.

use tephra_types::RowId;

use crate::posting::{SegmentPosting, POSTING_BLOCK_SIZE};

/// Term-document iterator with block-level score upper bounds.
#[derive(Debug)]
pub struct BlockMaxTermDocIterator {
    postings: Vec<SegmentPosting>,
    weight: f32,
    seg: usize,
    idx: usize,
    current: Option<RowId>,
}

impl BlockMaxTermDocIterator {
    /// Initialize from collected postings in segment order.
    #[must_use]
    pub fn new(postings: Vec<SegmentPosting>) -> Self {
        Self {
            postings,
            weight: 1.0,
            seg: 0,
            idx: 0,
            current: None,
        }
    }

    /// Scale the iterator's score contribution.
    pub fn multiply_weight(&mut self, weight: f32) {
        self.weight *= weight;
    }

    /// Current score weight.
    #[must_use]
    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Total documents across all segments.
    #[must_use]
    pub fn doc_freq(&self) -> u32 {
        self.postings.iter().map(|p| p.posting.doc_freq()).sum()
    }

    /// Advance to the next document.
    pub fn next_doc(&mut self) -> Option<RowId> {
        while self.seg < self.postings.len() {
            let seg = &self.postings[self.seg];
            let docs = seg.posting.docs();
            if self.idx < docs.len() {
                let row_id = seg.base_row_id.offset(u64::from(docs[self.idx].doc_off));
                self.idx += 1;
                self.current = Some(row_id);
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
        if let Some(current) = self.current {
            if current >= target {
                return Some(current);
            }
        }
        while self.seg < self.postings.len() {
            let seg = &self.postings[self.seg];
            let docs = seg.posting.docs();
            // Block-level skip: jump over blocks that end below the target.
            let blocks = seg.posting.blocks();
            let mut block = self.idx / POSTING_BLOCK_SIZE;
            while block < blocks.len()
                && seg.base_row_id.offset(u64::from(blocks[block].last_doc_off)) < target
            {
                block += 1;
            }
            if block >= blocks.len() {
                self.seg += 1;
                self.idx = 0;
                continue;
            }
            self.idx = self.idx.max(block * POSTING_BLOCK_SIZE);
            while self.idx < docs.len() {
                let row_id = seg.base_row_id.offset(u64::from(docs[self.idx].doc_off));
                self.idx += 1;
                if row_id >= target {
                    self.current = Some(row_id);
                    return Some(row_id);
                }
            }
            self.seg += 1;
            self.idx = 0;
        }
        self.current = None;
        None
    }

    /// Current document, if positioned.
    #[must_use]
    pub fn current_doc(&self) -> Option<RowId> {
        self.current
    }

    /// Weighted term frequency of the current document.
    #[must_use]
    pub fn score(&self) -> f32 {
        let Some(current) = self.current else {
            return 0.0;
        };
        let seg = &self.postings[self.seg];
        let doc_off = (current.get() - seg.base_row_id.get()) as u32;
        let tf = seg
            .posting
            .docs()
            .iter()
            .find(|d| d.doc_off == doc_off)
            .map_or(0, |d| d.term_freq);
        self.weight * tf as f32
    }

    /// Upper bound on [`Self::score`] for the block containing the current
    /// position. Zero when exhausted.
    #[must_use]
    pub fn block_max_score(&self) -> f32 {
        if self.seg >= self.postings.len() {
            return 0.0;
        }
        let seg = &self.postings[self.seg];
        let block = (self.idx.saturating_sub(1)) / POSTING_BLOCK_SIZE;
        seg.posting
            .blocks()
            .get(block)
            .map_or(0.0, |b| self.weight * b.max_term_freq as f32)
    }

    /// Last row id of the block containing the current position.
    #[must_use]
    pub fn block_last_doc_id(&self) -> RowId {
        if self.seg >= self.postings.len() {
            return RowId::INVALID;
        }
        let seg = &self.postings[self.seg];
        let block = (self.idx.saturating_sub(1)) / POSTING_BLOCK_SIZE;
        seg.posting
            .blocks()
            .get(block)
            .map_or(RowId::INVALID, |b| {
                seg.base_row_id.offset(u64::from(b.last_doc_off))
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::posting::{DocPosting, PostingData};

    fn posting(base: u64, offs: &[(u32, u32)]) -> SegmentPosting {
        let docs = offs
            .iter()
            .map(|&(doc_off, term_freq)| DocPosting { doc_off, term_freq })
            .collect();
        SegmentPosting {
            base_row_id: RowId::new(base),
            posting: Arc::new(PostingData::from_docs(docs)),
        }
    }

    #[test]
    fn weight_multiplies_scores() {
        let mut iter = BlockMaxTermDocIterator::new(vec![posting(0, &[(0, 4)])]);
        iter.multiply_weight(0.5);
        iter.multiply_weight(0.5);
        assert!((iter.weight() - 0.25).abs() < f32::EPSILON);
        iter.next_doc();
        assert!((iter.score() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn block_max_bounds_score() {
        let docs: Vec<(u32, u32)> = (0..200).map(|i| (i, if i == 150 { 7 } else { 2 })).collect();
        let mut iter = BlockMaxTermDocIterator::new(vec![posting(0, &docs)]);
        iter.next_doc();
        // First block: max tf 2.
        assert!((iter.block_max_score() - 2.0).abs() < f32::EPSILON);
        assert_eq!(iter.block_last_doc_id(), RowId::new(127));
        // Seek into the second block.
        iter.seek(RowId::new(140));
        assert!((iter.block_max_score() - 7.0).abs() < f32::EPSILON);
        assert_eq!(iter.block_last_doc_id(), RowId::new(199));
    }

    #[test]
    fn seek_crosses_segments() {
        let mut iter =
            BlockMaxTermDocIterator::new(vec![posting(0, &[(0, 1)]), posting(2000, &[(5, 3)])]);
        assert_eq!(iter.seek(RowId::new(100)), Some(RowId::new(2005)));
        assert!((iter.score() - 3.0).abs() < f32::EPSILON);
        assert_eq!(iter.next_doc(), None);
        assert!((iter.block_max_score() - 0.0).abs() < f32::EPSILON);
    }
}
