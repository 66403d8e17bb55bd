//! Per-segment index readers and the in-memory indexer.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tephra_error::Result;
use tephra_types::{OptionFlags, RowId};
use tephra_vfs::Vfs;

use crate::format;
use crate::posting::{DocPosting, PostingData, SegmentPosting};

/// A reader over one sub-segment of a column's index.
pub trait IndexSegmentReader: Send + Sync {
    /// First row id covered by this sub-segment.
    fn base_row_id(&self) -> RowId;

    /// The term's posting list in this sub-segment, if present.
    fn segment_posting(&self, term: &str) -> Option<SegmentPosting>;
}

// ---------------------------------------------------------------------------
// Disk reader
// ---------------------------------------------------------------------------

/// Reader over a sealed on-disk sub-segment.
///
/// The dictionary and postings are decoded eagerly at open; the reader is
/// immutable afterwards and shared by reference.
pub struct DiskIndexSegmentReader {
    base_row_id: RowId,
    terms: BTreeMap<String, Arc<PostingData>>,
}

impl DiskIndexSegmentReader {
    /// Open `<index_dir>/<base_name>.pst`.
    pub fn open(
        vfs: &dyn Vfs,
        index_dir: &Path,
        base_name: &str,
        base_row_id: RowId,
    ) -> Result<Self> {
        let (_flags, terms) = format::load_segment(vfs, index_dir, base_name)?;
        Ok(Self { base_row_id, terms })
    }
}

impl IndexSegmentReader for DiskIndexSegmentReader {
    fn base_row_id(&self) -> RowId {
        self.base_row_id
    }

    fn segment_posting(&self, term: &str) -> Option<SegmentPosting> {
        self.terms.get(term).map(|posting| SegmentPosting {
            base_row_id: self.base_row_id,
            posting: Arc::clone(posting),
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory indexer + reader
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct IndexerState {
    terms: BTreeMap<String, Vec<DocPosting>>,
    doc_count: u32,
    column_length_sum: u64,
}

/// The still-building in-memory tail segment of a column's index.
///
/// Writers call [`MemoryIndexer::insert`] under the table's commit path;
/// readers snapshot posting lists per term. Sealing dumps the state into
/// the on-disk sub-segment format.
pub struct MemoryIndexer {
    base_name: String,
    base_row_id: RowId,
    flags: OptionFlags,
    state: RwLock<IndexerState>,
}

impl MemoryIndexer {
    /// Create an empty indexer for the run starting at `base_row_id`.
    #[must_use]
    pub fn new(base_name: impl Into<String>, base_row_id: RowId, flags: OptionFlags) -> Self {
        Self {
            base_name: base_name.into(),
            base_row_id,
            flags,
            state: RwLock::new(IndexerState::default()),
        }
    }

    /// Sub-segment base name used when sealed.
    #[must_use]
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// First row id of the run.
    #[must_use]
    pub fn base_row_id(&self) -> RowId {
        self.base_row_id
    }

    /// Documents indexed so far.
    #[must_use]
    pub fn doc_count(&self) -> u32 {
        self.state.read().doc_count
    }

    /// Sum of indexed column lengths, in tokens.
    #[must_use]
    pub fn column_length_sum(&self) -> u64 {
        self.state.read().column_length_sum
    }

    /// Analyze `text` and index it as the document at `row_id`.
    ///
    /// `row_id` must be at or past the base row id; documents must arrive
    /// in row order.
    pub fn insert(&self, row_id: RowId, text: &str) {
        debug_assert!(row_id >= self.base_row_id);
        let doc_off = (row_id.get() - self.base_row_id.get()) as u32;
        let tokens = tokenize(text);
        let mut state = self.state.write();
        state.doc_count += 1;
        state.column_length_sum += tokens.len() as u64;
        let mut seen: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokens {
            *seen.entry(token).or_insert(0) += 1;
        }
        for (token, term_freq) in seen {
            let docs = state.terms.entry(token).or_default();
            debug_assert!(docs.last().map_or(true, |d| d.doc_off < doc_off));
            docs.push(DocPosting { doc_off, term_freq });
        }
    }

    /// Posting list for `term`, if any document contains it.
    #[must_use]
    pub fn segment_posting(&self, term: &str) -> Option<SegmentPosting> {
        let state = self.state.read();
        let docs = state.terms.get(term)?;
        Some(SegmentPosting {
            base_row_id: self.base_row_id,
            posting: Arc::new(PostingData::from_docs(docs.clone())),
        })
    }

    /// Persist the current state as a sealed on-disk sub-segment.
    pub fn dump(&self, vfs: &dyn Vfs, index_dir: &Path) -> Result<()> {
        let state = self.state.read();
        format::write_segment(vfs, index_dir, &self.base_name, self.flags, &state.terms)
    }
}

/// Reader over the in-memory tail segment.
pub struct InMemIndexSegmentReader {
    indexer: Arc<MemoryIndexer>,
}

impl InMemIndexSegmentReader {
    /// Wrap a live indexer.
    #[must_use]
    pub fn new(indexer: Arc<MemoryIndexer>) -> Self {
        Self { indexer }
    }
}

impl IndexSegmentReader for InMemIndexSegmentReader {
    fn base_row_id(&self) -> RowId {
        self.indexer.base_row_id()
    }

    fn segment_posting(&self, term: &str) -> Option<SegmentPosting> {
        self.indexer.segment_posting(term)
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// The "standard" analyzer: lowercase, split on non-alphanumerics.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}
