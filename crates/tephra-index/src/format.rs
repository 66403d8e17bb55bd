//! On-disk sub-segment format.
//!
//! One file per sealed sub-segment, `<base_name>.pst`:
//!
//! ```text
//! [u32 magic][u32 version][u32 flag bits][u32 term_count]
//! term_count * { [u32 len][term bytes][u32 doc_count]
//!                doc_count * { [u32 doc_off][u32 term_freq] } }
//! [u32 crc32 over everything above]
//! ```
//!
//! Terms are written in sorted order; block-max metadata is derived at
//! load time from the decoded postings.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tephra_error::{Result, TephraError};
use tephra_types::encoding::{append_str, append_u32_le, Reader};
use tephra_types::OptionFlags;
use tephra_vfs::Vfs;
use tracing::debug;

use crate::posting::{DocPosting, PostingData};

const SEGMENT_MAGIC: u32 = 0x5458_5053; // "SPXT"
const SEGMENT_VERSION: u32 = 1;

/// File name of a sub-segment's posting file.
#[must_use]
pub fn segment_file_name(base_name: &str) -> String {
    format!("{base_name}.pst")
}

/// Serialize and persist a sub-segment's term dictionary and postings.
pub fn write_segment(
    vfs: &dyn Vfs,
    index_dir: &Path,
    base_name: &str,
    flags: OptionFlags,
    terms: &BTreeMap<String, Vec<DocPosting>>,
) -> Result<()> {
    let mut buf = Vec::new();
    append_u32_le(&mut buf, SEGMENT_MAGIC);
    append_u32_le(&mut buf, SEGMENT_VERSION);
    append_u32_le(&mut buf, flags.bits());
    append_u32_le(&mut buf, terms.len() as u32);
    for (term, docs) in terms {
        append_str(&mut buf, term);
        append_u32_le(&mut buf, docs.len() as u32);
        for doc in docs {
            append_u32_le(&mut buf, doc.doc_off);
            append_u32_le(&mut buf, doc.term_freq);
        }
    }
    let crc = crc32fast::hash(&buf);
    append_u32_le(&mut buf, crc);

    let path = vfs.join(index_dir, &segment_file_name(base_name));
    vfs.write_all(&path, &buf)?;
    debug!(
        base_name,
        terms = terms.len(),
        bytes = buf.len(),
        "wrote index sub-segment"
    );
    Ok(())
}

/// Load a sub-segment's term dictionary and postings.
pub fn load_segment(
    vfs: &dyn Vfs,
    index_dir: &Path,
    base_name: &str,
) -> Result<(OptionFlags, BTreeMap<String, Arc<PostingData>>)> {
    let path = vfs.join(index_dir, &segment_file_name(base_name));
    let buf = vfs.read_all(&path)?;

    let corrupt = |detail: &str| TephraError::IndexCorrupt {
        detail: format!("{}: {detail}", path.display()),
    };

    if buf.len() < 4 {
        return Err(corrupt("file too small for checksum"));
    }
    let (body, trailer) = buf.split_at(buf.len() - 4);
    let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32fast::hash(body) != stored_crc {
        return Err(corrupt("checksum mismatch"));
    }

    let mut r = Reader::new(body);
    let magic = r.read_u32_le().ok_or_else(|| corrupt("truncated header"))?;
    if magic != SEGMENT_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = r.read_u32_le().ok_or_else(|| corrupt("truncated header"))?;
    if version != SEGMENT_VERSION {
        return Err(corrupt("unsupported version"));
    }
    let flag_bits = r.read_u32_le().ok_or_else(|| corrupt("truncated header"))?;
    let flags = OptionFlags::from_bits(flag_bits).ok_or_else(|| corrupt("unknown option flags"))?;
    let term_count = r.read_u32_le().ok_or_else(|| corrupt("truncated header"))?;

    let mut terms = BTreeMap::new();
    for _ in 0..term_count {
        let term = r.read_str().ok_or_else(|| corrupt("truncated term"))?;
        let doc_count = r
            .read_u32_le()
            .ok_or_else(|| corrupt("truncated doc count"))?;
        let mut docs = Vec::with_capacity(doc_count as usize);
        for _ in 0..doc_count {
            let doc_off = r.read_u32_le().ok_or_else(|| corrupt("truncated posting"))?;
            let term_freq = r.read_u32_le().ok_or_else(|| corrupt("truncated posting"))?;
            docs.push(DocPosting { doc_off, term_freq });
        }
        terms.insert(term, Arc::new(PostingData::from_docs(docs)));
    }
    if r.remaining() != 0 {
        return Err(corrupt("trailing bytes after dictionary"));
    }
    Ok((flags, terms))
}
